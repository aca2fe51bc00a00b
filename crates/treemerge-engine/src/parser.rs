//! Tree-sitter integration.
//!
//! Source code is parsed into a concrete syntax tree with Tree-sitter and
//! mapped onto [`AstNode`]s. Terminals become leaves labeled with their text;
//! non-terminals become internal nodes labeled with the text of their `name`
//! field, if the grammar has one. Punctuation is kept, so rendering the tree
//! reproduces the tokens of the source.

use std::path::Path;

use crate::error::ParseError;
use crate::tree::AstNode;
use crate::types::{Category, Language, ListOrdering, Revision};

/// Parses `source` into a tree with fresh pre-order ids.
pub fn parse_to_tree(source: &str, lang: Language) -> Result<AstNode, ParseError> {
    let ts_lang = get_tree_sitter_language(lang);
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&ts_lang)
        .map_err(|e| ParseError::Language(e.to_string()))?;

    let tree = parser.parse(source, None).ok_or(ParseError::ParseFailed)?;

    let mut root = ts_node_to_ast(&tree.root_node(), source.as_bytes());
    root.renumber(Revision::default());
    Ok(root)
}

/// Picks the grammar from a file's extension.
pub fn language_for_path(path: &Path) -> Result<Language, ParseError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    Language::from_extension(ext).ok_or_else(|| ParseError::UnsupportedExtension(ext.to_string()))
}

fn ts_node_to_ast(node: &tree_sitter::Node, source: &[u8]) -> AstNode {
    let kind = node.kind();
    let category = classify_category(kind);

    if node.child_count() == 0 {
        let text = node.utf8_text(source).unwrap_or("");
        return AstNode::leaf(kind, text).with_category(category);
    }

    let label = node
        .child_by_field_name("name")
        .and_then(|n| n.utf8_text(source).ok())
        .unwrap_or("");

    // Anonymous children are kept for punctuation fidelity.
    let children: Vec<AstNode> = (0..node.child_count())
        .filter_map(|i| node.child(i))
        .map(|child| ts_node_to_ast(&child, source))
        .collect();

    AstNode::internal(kind, label, classify_ordering(kind), children).with_category(category)
}

/// Import blocks and member lists can be permuted without changing the
/// program, so their children are matched and merged as sets.
fn classify_ordering(kind: &str) -> ListOrdering {
    match kind {
        "use_declaration_list" | "import_list" | "import_statement" | "imports" => {
            ListOrdering::Unordered
        }
        "class_body" | "enum_body" | "interface_body" | "declaration_list" => {
            ListOrdering::Unordered
        }
        _ => ListOrdering::Ordered,
    }
}

fn classify_category(kind: &str) -> Category {
    match kind {
        "source_file" | "program" | "module" | "translation_unit" => Category::File,
        "class_declaration" | "class_definition" | "class_specifier" | "struct_item"
        | "struct_specifier" | "enum_item" | "enum_declaration" | "trait_item" | "impl_item"
        | "interface_declaration" | "type_declaration" => Category::Class,
        "function_item" | "function_definition" | "function_declaration" | "method_declaration"
        | "method_definition" | "constructor_declaration" | "function_signature_item" => {
            Category::Method
        }
        "field_declaration" | "field_definition" | "public_field_definition" | "const_item"
        | "static_item" => Category::Field,
        k if k.ends_with("_statement") || k == "let_declaration" => Category::Statement,
        k if k.ends_with("_expression") || k.ends_with("_literal") => Category::Expression,
        _ => Category::Node,
    }
}

fn get_tree_sitter_language(lang: Language) -> tree_sitter::Language {
    let lang_ref = match lang {
        Language::Rust => tree_sitter_rust::LANGUAGE,
        Language::JavaScript => tree_sitter_javascript::LANGUAGE,
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        Language::Python => tree_sitter_python::LANGUAGE,
        Language::Java => tree_sitter_java::LANGUAGE,
        Language::Go => tree_sitter_go::LANGUAGE,
        Language::C => tree_sitter_c::LANGUAGE,
        Language::Cpp => tree_sitter_cpp::LANGUAGE,
    };
    lang_ref.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rust() {
        let src = "fn main() { let x = 1; }";
        let tree = parse_to_tree(src, Language::Rust).unwrap();
        assert_eq!(tree.kind(), "source_file");
        assert_eq!(tree.category(), Category::File);

        let function = &tree.children()[0];
        assert_eq!(function.kind(), "function_item");
        assert_eq!(function.label(), "main");
        assert_eq!(function.category(), Category::Method);
    }

    #[test]
    fn test_parse_javascript() {
        let src = "function foo() { return 42; }";
        let tree = parse_to_tree(src, Language::JavaScript).unwrap();
        assert_eq!(tree.kind(), "program");
        assert!(!tree.children().is_empty());
    }

    #[test]
    fn test_leaves_reproduce_tokens() {
        let tree = parse_to_tree("let x = 1;", Language::JavaScript).unwrap();
        assert_eq!(tree.render(), "let x = 1 ;");
    }

    #[test]
    fn test_ids_are_preorder() {
        let tree = parse_to_tree("fn f() {}", Language::Rust).unwrap();
        let ids: Vec<usize> = tree.preorder().iter().map(|n| n.id()).collect();
        let expected: Vec<usize> = (0..ids.len()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_member_lists_are_unordered() {
        assert_eq!(classify_ordering("class_body"), ListOrdering::Unordered);
        assert_eq!(classify_ordering("block"), ListOrdering::Ordered);
    }

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(Path::new("a/b.rs")), Ok(Language::Rust));
        assert_eq!(
            language_for_path(Path::new("notes.txt")),
            Err(ParseError::UnsupportedExtension("txt".into()))
        );
    }
}

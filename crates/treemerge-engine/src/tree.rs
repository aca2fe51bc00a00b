//! The tree model the matchers and the merge engine operate on.
//!
//! Nodes come in four shapes:
//! - **Leaf**: terminal node (identifier, literal, operator)
//! - **Internal**: node with an ordered list of owned children; its
//!   [`ListOrdering`] decides whether the children are matched as a sequence
//!   or as a set
//! - **Conflict**: two alternatives that could not be reconciled
//! - **Choice**: conditionally selected variants (n-way and conditional merges)
//!
//! Conflict and choice nodes only ever appear in merge output (or in an
//! intermediate result of an n-way merge).

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Category, ListOrdering, NodeId, NodeRef, Revision};

/// Content hash of a whole subtree.
pub type TreeHash = blake3::Hash;

/// Kind used for the synthesized empty base of two-way merges.
pub const EMPTY_KIND: &str = "<empty>";
pub const CONFLICT_KIND: &str = "<conflict>";
pub const CHOICE_KIND: &str = "<choice>";

/// Attributes every node carries regardless of its shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default)]
    pub id: NodeId,
    #[serde(default)]
    pub revision: Revision,
    pub kind: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub category: Category,
}

impl NodeMeta {
    fn new(kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: 0,
            revision: Revision::default(),
            kind: kind.into(),
            label: label.into(),
            category: Category::default(),
        }
    }
}

/// One alternative of a choice node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub condition: String,
    pub node: AstNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum AstNode {
    Leaf {
        meta: NodeMeta,
    },
    Internal {
        meta: NodeMeta,
        #[serde(default)]
        ordering: ListOrdering,
        #[serde(default)]
        children: Vec<AstNode>,
    },
    Conflict {
        meta: NodeMeta,
        left: Option<Box<AstNode>>,
        right: Option<Box<AstNode>>,
    },
    Choice {
        meta: NodeMeta,
        variants: Vec<Variant>,
    },
}

impl AstNode {
    pub fn leaf(kind: impl Into<String>, label: impl Into<String>) -> Self {
        AstNode::Leaf {
            meta: NodeMeta::new(kind, label),
        }
    }

    pub fn internal(
        kind: impl Into<String>,
        label: impl Into<String>,
        ordering: ListOrdering,
        children: Vec<AstNode>,
    ) -> Self {
        AstNode::Internal {
            meta: NodeMeta::new(kind, label),
            ordering,
            children,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.meta_mut().category = category;
        self
    }

    /// An empty tree, used as the base of two-way merges and as the output
    /// container the merge engine fills.
    pub fn empty(revision: Revision) -> Self {
        let mut meta = NodeMeta::new(EMPTY_KIND, "");
        meta.revision = revision;
        AstNode::Internal {
            meta,
            ordering: ListOrdering::Ordered,
            children: Vec::new(),
        }
    }

    /// Wraps two irreconcilable alternatives. Either side may be absent
    /// (e.g. a modification that conflicts with a deletion).
    pub fn conflict(left: Option<AstNode>, right: Option<AstNode>) -> Self {
        let category = left
            .as_ref()
            .or(right.as_ref())
            .map(|n| n.category())
            .unwrap_or_default();
        let mut meta = NodeMeta::new(CONFLICT_KIND, "");
        meta.category = category;
        AstNode::Conflict {
            meta,
            left: left.map(Box::new),
            right: right.map(Box::new),
        }
    }

    /// A choice node holding `node` as its only variant.
    pub fn choice(condition: impl Into<String>, node: AstNode) -> Self {
        let mut meta = NodeMeta::new(CHOICE_KIND, "");
        meta.category = node.category();
        AstNode::Choice {
            meta,
            variants: vec![Variant {
                condition: condition.into(),
                node,
            }],
        }
    }

    pub fn meta(&self) -> &NodeMeta {
        match self {
            AstNode::Leaf { meta }
            | AstNode::Internal { meta, .. }
            | AstNode::Conflict { meta, .. }
            | AstNode::Choice { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            AstNode::Leaf { meta }
            | AstNode::Internal { meta, .. }
            | AstNode::Conflict { meta, .. }
            | AstNode::Choice { meta, .. } => meta,
        }
    }

    pub fn id(&self) -> NodeId {
        self.meta().id
    }

    pub fn revision(&self) -> Revision {
        self.meta().revision
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.revision(), self.id())
    }

    pub fn kind(&self) -> &str {
        &self.meta().kind
    }

    pub fn label(&self) -> &str {
        &self.meta().label
    }

    pub fn category(&self) -> Category {
        self.meta().category
    }

    pub fn children(&self) -> &[AstNode] {
        match self {
            AstNode::Internal { children, .. } => children,
            _ => &[],
        }
    }

    /// `None` for nodes that cannot hold children.
    pub fn children_mut(&mut self) -> Option<&mut Vec<AstNode>> {
        match self {
            AstNode::Internal { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    pub fn ordering(&self) -> ListOrdering {
        match self {
            AstNode::Internal { ordering, .. } => *ordering,
            _ => ListOrdering::Ordered,
        }
    }

    /// Whether the position of this node's children is significant.
    pub fn has_ordered_children(&self) -> bool {
        self.ordering() == ListOrdering::Ordered && !self.children().is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, AstNode::Leaf { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AstNode::Conflict { .. })
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, AstNode::Choice { .. })
    }

    pub fn is_empty(&self) -> bool {
        self.kind() == EMPTY_KIND && self.children().is_empty()
    }

    pub fn variants(&self) -> &[Variant] {
        match self {
            AstNode::Choice { variants, .. } => variants,
            _ => &[],
        }
    }

    /// Adds a variant to a choice node. A variant whose subtree is identical
    /// to an existing one is folded into it, joining the conditions with `||`.
    /// Returns `false` if `self` is not a choice node.
    pub fn add_variant(&mut self, condition: impl Into<String>, node: AstNode) -> bool {
        let AstNode::Choice { variants, .. } = self else {
            return false;
        };
        let mut condition = condition.into();
        let hash = node.subtree_hash();
        variants.retain(|v| {
            if v.node.subtree_hash() == hash {
                condition = format!("{} || {}", v.condition, condition);
                false
            } else {
                true
            }
        });
        variants.push(Variant { condition, node });
        true
    }

    /// Labels match: same kind and same label.
    pub fn matches(&self, other: &AstNode) -> bool {
        self.kind() == other.kind() && self.label() == other.label()
    }

    /// Coarser check used to restrict cost-model candidates: same kind.
    pub fn category_matches(&self, other: &AstNode) -> bool {
        self.kind() == other.kind()
    }

    /// Total number of nodes in this subtree.
    pub fn tree_size(&self) -> usize {
        1 + self.children().iter().map(|c| c.tree_size()).sum::<usize>()
    }

    /// Content hash over kind, label and the children's hashes. Ids and
    /// revisions do not contribute, so identical subtrees of different
    /// revisions hash alike.
    pub fn subtree_hash(&self) -> TreeHash {
        let mut hasher = blake3::Hasher::new();
        self.hash_header(&mut hasher);
        for child in self.children() {
            hasher.update(child.subtree_hash().as_bytes());
        }
        hasher.finalize()
    }

    /// Computes the subtree hash of every node below (and including) `self`
    /// in one pass.
    pub fn hash_all(&self, out: &mut HashMap<NodeRef, TreeHash>) -> TreeHash {
        let mut hasher = blake3::Hasher::new();
        self.hash_header(&mut hasher);
        for child in self.children() {
            hasher.update(child.hash_all(out).as_bytes());
        }
        let hash = hasher.finalize();
        out.insert(self.node_ref(), hash);
        hash
    }

    fn hash_header(&self, hasher: &mut blake3::Hasher) {
        let prefix: &[u8] = if self.children().is_empty() { b"0" } else { b"1" };
        hasher.update(prefix);
        hasher.update(self.kind().as_bytes());
        hasher.update(&[0]);
        hasher.update(self.label().as_bytes());
        match self {
            AstNode::Conflict { left, right, .. } => {
                for alt in [left, right] {
                    match alt {
                        Some(node) => hasher.update(node.subtree_hash().as_bytes()),
                        None => hasher.update(b"-"),
                    };
                }
            }
            AstNode::Choice { variants, .. } => {
                for v in variants {
                    hasher.update(v.condition.as_bytes());
                    hasher.update(v.node.subtree_hash().as_bytes());
                }
            }
            _ => {}
        }
    }

    /// Copy of this node without its children.
    pub fn shallow_copy(&self) -> AstNode {
        match self {
            AstNode::Internal { meta, ordering, .. } => AstNode::Internal {
                meta: meta.clone(),
                ordering: *ordering,
                children: Vec::new(),
            },
            other => other.clone(),
        }
    }

    /// Depth-first pre-order over regular children.
    pub fn preorder(&self) -> Vec<&AstNode> {
        let mut out = Vec::with_capacity(self.tree_size());
        self.preorder_inner(&mut out);
        out
    }

    fn preorder_inner<'a>(&'a self, out: &mut Vec<&'a AstNode>) {
        out.push(self);
        for c in self.children() {
            c.preorder_inner(out);
        }
    }

    /// Breadth-first order over regular children.
    pub fn bfs(&self) -> Vec<&AstNode> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([self]);
        while let Some(node) = queue.pop_front() {
            out.push(node);
            queue.extend(node.children());
        }
        out
    }

    /// Pre-order that also descends into conflict alternatives and choice
    /// variants.
    pub fn walk(&self) -> Vec<&AstNode> {
        let mut out = Vec::new();
        self.walk_inner(&mut out);
        out
    }

    fn walk_inner<'a>(&'a self, out: &mut Vec<&'a AstNode>) {
        out.push(self);
        match self {
            AstNode::Leaf { .. } => {}
            AstNode::Internal { children, .. } => children.iter().for_each(|c| c.walk_inner(out)),
            AstNode::Conflict { left, right, .. } => {
                left.iter().chain(right.iter()).for_each(|c| c.walk_inner(out))
            }
            AstNode::Choice { variants, .. } => variants.iter().for_each(|v| v.node.walk_inner(out)),
        }
    }

    /// Assigns pre-order ids (conflict alternatives and choice variants
    /// included) and tags every node with `revision`.
    pub fn renumber(&mut self, revision: Revision) {
        let mut next = 0;
        self.renumber_inner(revision, &mut next);
    }

    fn renumber_inner(&mut self, revision: Revision, next: &mut NodeId) {
        let meta = self.meta_mut();
        meta.id = *next;
        meta.revision = revision;
        *next += 1;
        match self {
            AstNode::Leaf { .. } => {}
            AstNode::Internal { children, .. } => {
                children.iter_mut().for_each(|c| c.renumber_inner(revision, next))
            }
            AstNode::Conflict { left, right, .. } => left
                .iter_mut()
                .chain(right.iter_mut())
                .for_each(|c| c.renumber_inner(revision, next)),
            AstNode::Choice { variants, .. } => variants
                .iter_mut()
                .for_each(|v| v.node.renumber_inner(revision, next)),
        }
    }

    /// Text rendering: leaves joined by spaces, conflicts framed with
    /// `<<<<<<<`/`=======`/`>>>>>>>` markers and choices with `#if`/`#endif`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out.trim().to_string()
    }

    fn render_into(&self, out: &mut String) {
        match self {
            AstNode::Leaf { meta } => {
                push_token(out, &meta.label);
            }
            AstNode::Internal { children, .. } => {
                for c in children {
                    c.render_into(out);
                }
            }
            AstNode::Conflict { left, right, .. } => {
                out.push_str("\n<<<<<<< left\n");
                if let Some(l) = left {
                    out.push_str(&l.render());
                    out.push('\n');
                }
                out.push_str("=======\n");
                if let Some(r) = right {
                    out.push_str(&r.render());
                    out.push('\n');
                }
                out.push_str(">>>>>>> right\n");
            }
            AstNode::Choice { variants, .. } => {
                for (i, v) in variants.iter().enumerate() {
                    let directive = if i == 0 { "#if" } else { "#elif" };
                    out.push_str(&format!("\n{} {}\n", directive, v.condition));
                    out.push_str(&v.node.render());
                }
                out.push_str("\n#endif\n");
            }
        }
    }
}

fn push_token(out: &mut String, token: &str) {
    if token.is_empty() {
        return;
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push(' ');
    }
    out.push_str(token);
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AstNode {
        AstNode::internal(
            "block",
            "",
            ListOrdering::Ordered,
            vec![
                AstNode::leaf("id", "a"),
                AstNode::internal("call", "f", ListOrdering::Ordered, vec![AstNode::leaf("id", "b")]),
            ],
        )
    }

    #[test]
    fn test_renumber_is_preorder() {
        let mut tree = sample();
        tree.renumber(Revision::Left);
        let ids: Vec<_> = tree.preorder().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(tree.preorder().iter().all(|n| n.revision() == Revision::Left));
    }

    #[test]
    fn test_hash_ignores_ids_and_revisions() {
        let mut a = sample();
        let mut b = sample();
        a.renumber(Revision::Left);
        b.renumber(Revision::Right);
        assert_eq!(a.subtree_hash(), b.subtree_hash());

        let c = AstNode::internal("block", "", ListOrdering::Ordered, vec![AstNode::leaf("id", "a")]);
        assert_ne!(a.subtree_hash(), c.subtree_hash());
    }

    #[test]
    fn test_leaf_and_parent_hash_differ() {
        let leaf = AstNode::leaf("x", "");
        let parent = AstNode::internal("x", "", ListOrdering::Ordered, vec![AstNode::leaf("y", "")]);
        assert_ne!(leaf.subtree_hash(), parent.subtree_hash());
    }

    #[test]
    fn test_hash_all_matches_subtree_hash() {
        let mut tree = sample();
        tree.renumber(Revision::Base);
        let mut hashes = HashMap::new();
        let root = tree.hash_all(&mut hashes);
        assert_eq!(root, tree.subtree_hash());
        assert_eq!(hashes.len(), tree.tree_size());
    }

    #[test]
    fn test_add_variant_merges_identical_conditions() {
        let mut choice = AstNode::choice("A", AstNode::leaf("id", "x"));
        choice.add_variant("B", AstNode::leaf("id", "y"));
        choice.add_variant("C", AstNode::leaf("id", "x"));
        let conditions: Vec<_> = choice.variants().iter().map(|v| v.condition.as_str()).collect();
        assert_eq!(conditions, vec!["B", "A || C"]);
        assert!(!AstNode::leaf("id", "x").add_variant("A", AstNode::leaf("id", "x")));
    }

    #[test]
    fn test_render_conflict_markers() {
        let tree = AstNode::internal(
            "class",
            "A",
            ListOrdering::Ordered,
            vec![AstNode::conflict(
                Some(AstNode::leaf("m", "foo")),
                Some(AstNode::leaf("m", "bar")),
            )],
        );
        let text = tree.render();
        assert!(text.contains("<<<<<<< left\nfoo\n=======\nbar\n>>>>>>> right"));
    }

    #[test]
    fn test_shallow_copy_drops_children() {
        let copy = sample().shallow_copy();
        assert_eq!(copy.kind(), "block");
        assert!(copy.children().is_empty());
    }

    #[test]
    fn test_json_round_trip_keeps_shape() {
        let tree = sample().with_category(Category::Statement);
        let json = serde_json::to_string(&tree).unwrap();
        let back: AstNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}

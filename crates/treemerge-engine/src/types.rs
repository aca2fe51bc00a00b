//! Core value types shared by the matchers and the merge engine.
//!
//! Trees themselves live in [`crate::tree`]; this module holds the small
//! tags that travel with every node (revision, category, ordering) and the
//! merge scenario that groups the input trees.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;
use crate::tree::AstNode;

/// Pre-order position of a node inside its tree.
pub type NodeId = usize;

/// The input version a node belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Revision {
    Left,
    Base,
    Right,
    /// Nodes of a merge result.
    #[default]
    Target,
    /// The n-th input of an n-way merge.
    Variant(u32),
}

impl Revision {
    /// Human readable name, also used as the condition of choice variants.
    ///
    /// N-way variants are named `A`, `B`, ..., `Z`, `AA`, `AB`, ...
    pub fn name(&self) -> String {
        match self {
            Revision::Left => "left".into(),
            Revision::Base => "base".into(),
            Revision::Right => "right".into(),
            Revision::Target => "target".into(),
            Revision::Variant(n) => {
                let mut n = *n as usize;
                let mut name = Vec::new();
                loop {
                    name.push(b'A' + (n % 26) as u8);
                    if n < 26 {
                        break;
                    }
                    n = n / 26 - 1;
                }
                name.reverse();
                String::from_utf8_lossy(&name).into_owned()
            }
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Identity of a node across all trees of one merge: revision plus pre-order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub revision: Revision,
    pub id: NodeId,
}

impl NodeRef {
    pub fn new(revision: Revision, id: NodeId) -> Self {
        Self { revision, id }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.revision, self.id)
    }
}

/// Ordering semantics of an internal node's children.
/// Unordered children (imports, class members) can be permuted freely, so
/// they are matched as an assignment problem instead of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrdering {
    #[default]
    Ordered,
    Unordered,
}

/// Coarse domain category of a node. Drives rename easing in the cost model,
/// per-category look-ahead and the statistics buckets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Node,
    File,
    Class,
    Method,
    Field,
    Statement,
    Expression,
}

/// Supported programming languages for tree-sitter parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Rust,
    JavaScript,
    TypeScript,
    Python,
    Java,
    Go,
    C,
    Cpp,
}

impl Language {
    /// Infer language from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Language::Rust),
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "tsx" => Some(Language::TypeScript),
            "py" => Some(Language::Python),
            "java" => Some(Language::Java),
            "go" => Some(Language::Go),
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" => Some(Language::Cpp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeType {
    TwoWay,
    ThreeWay,
    NWay,
}

impl fmt::Display for MergeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeType::TwoWay => write!(f, "two-way"),
            MergeType::ThreeWay => write!(f, "three-way"),
            MergeType::NWay => write!(f, "n-way"),
        }
    }
}

/// A two- or three-way merge scenario: base, left, and right revisions.
///
/// Two-way scenarios carry an empty base so that the merge routine can treat
/// both kinds the same way.
#[derive(Debug, Clone)]
pub struct MergeScenario {
    pub merge_type: MergeType,
    pub base: AstNode,
    pub left: AstNode,
    pub right: AstNode,
}

impl MergeScenario {
    /// Tags and renumbers the inputs as left/base/right.
    pub fn three_way(mut left: AstNode, mut base: AstNode, mut right: AstNode) -> Self {
        left.renumber(Revision::Left);
        base.renumber(Revision::Base);
        right.renumber(Revision::Right);
        Self {
            merge_type: MergeType::ThreeWay,
            base,
            left,
            right,
        }
    }

    /// Tags and renumbers the inputs and synthesizes an empty base.
    pub fn two_way(mut left: AstNode, mut right: AstNode) -> Self {
        left.renumber(Revision::Left);
        right.renumber(Revision::Right);
        Self {
            merge_type: MergeType::TwoWay,
            base: AstNode::empty(Revision::Base),
            left,
            right,
        }
    }

    /// Builds a scenario from an input list in `left, [base,] right` order.
    pub fn from_inputs(inputs: Vec<AstNode>) -> Result<Self, ScenarioError> {
        let actual = inputs.len();
        let mut it = inputs.into_iter();
        match (it.next(), it.next(), it.next(), it.next()) {
            (Some(left), Some(right), None, None) => Ok(Self::two_way(left, right)),
            (Some(left), Some(base), Some(right), None) => Ok(Self::three_way(left, base, right)),
            _ => Err(ScenarioError::Cardinality {
                expected: "two- or three-way",
                needed: "2 or 3",
                actual,
            }),
        }
    }

    /// Uses already tagged trees as they are, after validating them.
    pub fn new(
        merge_type: MergeType,
        left: AstNode,
        base: AstNode,
        right: AstNode,
    ) -> Result<Self, ScenarioError> {
        let scenario = Self {
            merge_type,
            base,
            left,
            right,
        };
        scenario.validate()?;
        Ok(scenario)
    }

    /// Checks that every tree carries a single, distinct revision tag and that
    /// the base is either empty or rooted like the left tree.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.merge_type == MergeType::NWay {
            return Err(ScenarioError::Cardinality {
                expected: "two- or three-way",
                needed: "2 or 3",
                actual: 0,
            });
        }

        let left = uniform_revision(&self.left)?;
        let right = uniform_revision(&self.right)?;
        if left == right {
            return Err(ScenarioError::DuplicateRevision(left));
        }

        if self.base.is_empty() {
            return Ok(());
        }
        if self.merge_type == MergeType::TwoWay {
            return Err(ScenarioError::UnexpectedBase);
        }

        let base = uniform_revision(&self.base)?;
        if base == left || base == right {
            return Err(ScenarioError::DuplicateRevision(base));
        }
        if !self.base.category_matches(&self.left) {
            return Err(ScenarioError::IncompatibleBase {
                base: self.base.kind().to_string(),
                left: self.left.kind().to_string(),
            });
        }
        Ok(())
    }

    pub fn revisions(&self) -> (Revision, Revision, Revision) {
        (
            self.left.revision(),
            self.base.revision(),
            self.right.revision(),
        )
    }
}

fn uniform_revision(tree: &AstNode) -> Result<Revision, ScenarioError> {
    let expected = tree.revision();
    match tree.preorder().into_iter().find(|n| n.revision() != expected) {
        Some(node) => Err(ScenarioError::InconsistentRevision {
            expected,
            found: node.revision(),
        }),
        None => Ok(expected),
    }
}

//! # treemerge-engine
//!
//! Structured merging of labeled trees. Instead of comparing lines, the
//! engine matches the nodes of diverged versions of a tree and builds the
//! merged tree from that matching, so that reordered members, moved imports
//! and independent edits to the same region merge cleanly.
//!
//! ## Approach
//!
//! 1. **Matching**: a dispatcher walks both trees top-down and hands each
//!    node pair to a strategy chosen by the ordering of its children:
//!    Simple Tree Matching (or the MCE subtree matcher) for sequences, an
//!    assignment problem solved by the Hungarian method or a linear program
//!    for sets. Identical subtrees are paired up front, and a look-ahead lets
//!    the search continue below nodes that do not match.
//!    *Based on: Apel, Leßenich, Lengauer, "Structured Merge with
//!    Auto-Tuning: Balancing Precision and Performance", ASE 2012*
//!
//! 2. **Cost-model matching**: optionally, a randomized search over complete
//!    matchings that penalizes renamings, broken ancestry, scattered
//!    siblings and reordering, which finds renamed and shifted code the
//!    top-down matchers miss.
//!    *Based on: Leßenich, Apel, Kästner, Seibt, Siegmund, "Renaming and
//!    Shifted Code in Structured Merging", ASE 2017*
//!
//! 3. **Operations**: the matched trees are walked once, and every decision
//!    becomes an add, delete or conflict operation applied to an initially
//!    empty output tree. With conditional merging, conflicts become choice
//!    nodes, which is also how n-way merges keep every variant.
//!
//! ## Example
//!
//! ```rust
//! use treemerge_engine::{AstNode, ListOrdering, MergeConfig, MergeEngine, MergeScenario};
//!
//! let class = |members: Vec<AstNode>| {
//!     AstNode::internal("class", "Foo", ListOrdering::Unordered, members)
//! };
//! let method = |name: &str| AstNode::leaf("method", name);
//!
//! let base = class(vec![method("a")]);
//! let left = class(vec![method("a"), method("b")]);
//! let right = class(vec![method("c"), method("a")]);
//!
//! let engine = MergeEngine::new(MergeConfig::default())?;
//! let outcome = engine.merge(&MergeScenario::three_way(left, base, right))?;
//!
//! assert!(!outcome.has_conflicts());
//! assert_eq!(outcome.tree.child_count(), 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cost_model;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod matching;
pub mod merge;
pub mod operations;
pub mod parser;
pub mod stats;
pub mod tree;
pub mod types;

// Re-export primary public API
pub use engine::{MergeConfig, MergeEngine, MergeOutcome};
pub use error::{ConfigError, MatchingsError, MergeError, ParseError, ScenarioError};
pub use matcher::{Matcher, MatcherConfig};
pub use matching::{Matching, Matchings};
pub use stats::MergeStatistics;
pub use tree::AstNode;
pub use types::{Category, Language, ListOrdering, MergeScenario, MergeType, NodeRef, Revision};

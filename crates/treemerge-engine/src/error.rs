//! Error types for matching and merging.

use thiserror::Error;

use crate::types::{NodeRef, Revision};

/// Invalid configuration, rejected before any matching starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("no matcher strategy registered under the name `{0}`")]
    UnknownStrategy(String),
    #[error("`{name}` must lie in [0, 1], got {value}")]
    FractionOutOfRange { name: &'static str, value: f32 },
    #[error("`fix_lower` ({lower}) must not exceed `fix_upper` ({upper})")]
    InvertedFixRange { lower: f32, upper: f32 },
    #[error("weight `{name}` must be finite and non-negative, got {value}")]
    InvalidWeight { name: &'static str, value: f32 },
    #[error("the cost model needs at least one iteration")]
    NoIterations,
}

/// A merge scenario that cannot be merged as given.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("a {expected} merge needs {needed} inputs, got {actual}")]
    Cardinality {
        expected: &'static str,
        needed: &'static str,
        actual: usize,
    },
    #[error("input tagged {found} where {expected} was expected")]
    InconsistentRevision { expected: Revision, found: Revision },
    #[error("revision {0} is used by more than one input")]
    DuplicateRevision(Revision),
    #[error("a two-way scenario must have an empty base")]
    UnexpectedBase,
    #[error("base root `{base}` is not compatible with left root `{left}`")]
    IncompatibleBase { base: String, left: String },
}

/// Failure while deriving or applying merge operations.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("merge target {0} already has children")]
    TargetNotEmpty(NodeRef),
    #[error("operation #{sequence} was created for target {expected} but applied to {actual}")]
    InvalidTarget {
        sequence: u64,
        expected: NodeRef,
        actual: NodeRef,
    },
    #[error("target {0} cannot hold children")]
    NotAContainer(NodeRef),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Consistency problems reported by [`crate::matching::Matchings::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchingsError {
    #[error("matching references {0}, which is not part of the compared trees")]
    ForeignNode(NodeRef),
    #[error("{0} appears in more than one matching")]
    Duplicate(NodeRef),
    #[error("{0} is not covered by any edge of the cost-model matching")]
    Uncovered(NodeRef),
}

/// Tree-sitter adapter failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("language error: {0}")]
    Language(String),
    #[error("parse failed")]
    ParseFailed,
    #[error("no grammar for file extension `{0}`")]
    UnsupportedExtension(String),
}

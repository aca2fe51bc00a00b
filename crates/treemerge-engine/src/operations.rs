//! Merge operations.
//!
//! The merge walk turns every decision into an [`Operation`] and applies it
//! to the output node it was created for. Applying consumes the operation, so
//! each one takes effect at most once. Deletions are implicit: the output
//! starts empty, so a plain `Delete` only updates the statistics.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::MergeError;
use crate::merge::MergeContext;
use crate::tree::AstNode;
use crate::types::NodeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Delete,
    Conflict,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Add => write!(f, "ADD"),
            OperationKind::Delete => write!(f, "DELETE"),
            OperationKind::Conflict => write!(f, "CONFLICT"),
        }
    }
}

/// What an applied operation did, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub sequence: u64,
    pub kind: OperationKind,
    /// The node added or deleted, or the conflicting alternatives.
    pub nodes: Vec<NodeRef>,
    pub target: NodeRef,
    /// Output node created by the operation, if any.
    pub created: Option<NodeRef>,
    pub conditions: Vec<String>,
}

impl fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sequence, self.kind)?;
        for node in &self.nodes {
            write!(f, " {node}")?;
        }
        write!(f, " -> {}", self.target)?;
        if !self.conditions.is_empty() {
            write!(f, " ({})", self.conditions.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum Operation<'a> {
    /// Copies `node` into the target. A shallow add copies the node without
    /// its children; the merge walk fills them in afterwards.
    Add {
        sequence: u64,
        node: Cow<'a, AstNode>,
        target: NodeRef,
        condition: Option<String>,
        shallow: bool,
    },
    Delete {
        sequence: u64,
        node: &'a AstNode,
        target: NodeRef,
        condition: Option<String>,
    },
    Conflict {
        sequence: u64,
        left: Option<&'a AstNode>,
        right: Option<&'a AstNode>,
        target: NodeRef,
        left_condition: Option<String>,
        right_condition: Option<String>,
    },
}

impl<'a> Operation<'a> {
    pub fn add(
        ctx: &mut MergeContext,
        node: Cow<'a, AstNode>,
        target: &AstNode,
        condition: Option<String>,
        shallow: bool,
    ) -> Self {
        Operation::Add {
            sequence: ctx.next_sequence(),
            node,
            target: target.node_ref(),
            condition,
            shallow,
        }
    }

    pub fn delete(
        ctx: &mut MergeContext,
        node: &'a AstNode,
        target: &AstNode,
        condition: Option<String>,
    ) -> Self {
        Operation::Delete {
            sequence: ctx.next_sequence(),
            node,
            target: target.node_ref(),
            condition,
        }
    }

    pub fn conflict(
        ctx: &mut MergeContext,
        left: Option<&'a AstNode>,
        right: Option<&'a AstNode>,
        target: &AstNode,
        left_condition: Option<String>,
        right_condition: Option<String>,
    ) -> Self {
        Operation::Conflict {
            sequence: ctx.next_sequence(),
            left,
            right,
            target: target.node_ref(),
            left_condition,
            right_condition,
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            Operation::Add { sequence, .. }
            | Operation::Delete { sequence, .. }
            | Operation::Conflict { sequence, .. } => *sequence,
        }
    }

    pub fn target(&self) -> NodeRef {
        match self {
            Operation::Add { target, .. }
            | Operation::Delete { target, .. }
            | Operation::Conflict { target, .. } => *target,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Add { .. } => OperationKind::Add,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Conflict { .. } => OperationKind::Conflict,
        }
    }

    /// Applies the operation to `target`, which must be the output node the
    /// operation was created for.
    pub fn apply(self, target: &mut AstNode, ctx: &mut MergeContext) -> Result<(), MergeError> {
        let sequence = self.sequence();
        let expected = self.target();
        let actual = target.node_ref();
        if actual != expected {
            return Err(MergeError::InvalidTarget {
                sequence,
                expected,
                actual,
            });
        }
        let kind = self.kind();
        let children = target
            .children_mut()
            .ok_or(MergeError::NotAContainer(actual))?;

        let (nodes, conditions, created) = match self {
            Operation::Add {
                node,
                condition,
                shallow,
                ..
            } => {
                let nodes = vec![node.node_ref()];
                let created = if node.is_choice() {
                    ctx.statistics.element(node.category()).choices += 1;
                    node.into_owned()
                } else if let Some(condition) = condition.as_ref().filter(|_| ctx.conditional) {
                    ctx.statistics.count_added(&node);
                    ctx.statistics.element(node.category()).choices += 1;
                    AstNode::choice(condition.clone(), node.into_owned())
                } else if shallow {
                    ctx.statistics.element(node.category()).merged += 1;
                    node.shallow_copy()
                } else {
                    ctx.statistics.count_added(&node);
                    node.into_owned()
                };
                (nodes, condition.into_iter().collect(), Some(ctx.push(children, created)))
            }
            Operation::Delete {
                node, condition, ..
            } => {
                ctx.statistics.count_deleted(node);
                let created = match condition.as_ref().filter(|_| ctx.conditional) {
                    Some(condition) => {
                        ctx.statistics.element(node.category()).choices += 1;
                        let choice = AstNode::choice(condition.clone(), node.clone());
                        Some(ctx.push(children, choice))
                    }
                    None => None,
                };
                (vec![node.node_ref()], condition.into_iter().collect(), created)
            }
            Operation::Conflict {
                left,
                right,
                left_condition,
                right_condition,
                ..
            } => {
                let nodes = left.iter().chain(right.iter()).map(|n| n.node_ref()).collect();
                let conditions: Vec<String> = left_condition
                    .iter()
                    .chain(right_condition.iter())
                    .cloned()
                    .collect();
                let created = match (left_condition, right_condition) {
                    (Some(lc), Some(rc)) if ctx.conditional => {
                        let choice = choice_of(left, right, lc, rc);
                        ctx.statistics.element(choice.category()).choices += 1;
                        choice
                    }
                    _ => {
                        let conflict = AstNode::conflict(left.cloned(), right.cloned());
                        ctx.statistics.count_conflict(conflict.category());
                        conflict
                    }
                };
                (nodes, conditions, Some(ctx.push(children, created)))
            }
        };

        ctx.statistics.record_operation(kind);
        let record = OperationRecord {
            sequence,
            kind,
            nodes,
            target: actual,
            created,
            conditions,
        };
        trace!(operation = %record, "applied");
        ctx.record(record);
        Ok(())
    }
}

/// A choice holding both alternatives. A left alternative that already is a
/// choice (from an earlier n-way step) is extended instead of nested.
fn choice_of(
    left: Option<&AstNode>,
    right: Option<&AstNode>,
    left_condition: String,
    right_condition: String,
) -> AstNode {
    let mut choice = match left {
        Some(l) if l.is_choice() => l.clone(),
        Some(l) => AstNode::choice(left_condition, l.clone()),
        None => match right {
            Some(r) => return AstNode::choice(right_condition, r.clone()),
            None => return AstNode::conflict(None, None),
        },
    };
    if let Some(r) = right {
        choice.add_variant(right_condition, r.clone());
    }
    choice
}

impl fmt::Display for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sequence(), self.kind())?;
        match self {
            Operation::Add { node, condition, .. } => {
                write!(f, " {}", node.node_ref())?;
                if let Some(c) = condition {
                    write!(f, " ({c})")?;
                }
            }
            Operation::Delete { node, .. } => write!(f, " {}", node.node_ref())?,
            Operation::Conflict { left, right, .. } => {
                let side = |n: &Option<&AstNode>| {
                    n.map_or_else(|| "-".to_string(), |n| n.node_ref().to_string())
                };
                write!(f, " {{{}}} <~~> {{{}}}", side(left), side(right))?;
            }
        }
        write!(f, " -> {}", self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::*;
    use crate::stats::MergeStatistics;
    use crate::types::Revision;

    fn container(ctx: &mut MergeContext) -> AstNode {
        ctx.output_root()
    }

    fn left_tree() -> AstNode {
        tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Left)
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut ctx = MergeContext::new(false);
        let mut target = container(&mut ctx);
        let tree = left_tree();
        let a = Operation::add(&mut ctx, Cow::Borrowed(&tree.children()[0]), &target, None, false);
        let b = Operation::delete(&mut ctx, &tree.children()[1], &target, None);
        assert!(a.sequence() < b.sequence());

        a.apply(&mut target, &mut ctx).unwrap();
        b.apply(&mut target, &mut ctx).unwrap();
        assert_eq!(target.child_count(), 1);
        assert_eq!(ctx.log().len(), 2);
        assert_eq!(ctx.log()[1].kind, OperationKind::Delete);
    }

    #[test]
    fn test_shallow_add_copies_node_only() {
        let mut ctx = MergeContext::new(false);
        let mut target = container(&mut ctx);
        let tree = left_tree();
        Operation::add(&mut ctx, Cow::Borrowed(&tree), &target, None, true)
            .apply(&mut target, &mut ctx)
            .unwrap();

        let added = &target.children()[0];
        assert_eq!(added.kind(), "A");
        assert_eq!(added.child_count(), 0);
        assert_eq!(added.revision(), Revision::Target);
        assert_ne!(added.node_ref(), target.node_ref());
        assert_eq!(ctx.statistics.totals().merged, 1);
    }

    #[test]
    fn test_wrong_target_rejected() {
        let mut ctx = MergeContext::new(false);
        let target = container(&mut ctx);
        let mut other = container(&mut ctx);
        let tree = left_tree();
        let op = Operation::add(&mut ctx, Cow::Borrowed(&tree), &target, None, false);
        let err = op.apply(&mut other, &mut ctx).unwrap_err();
        assert!(matches!(err, MergeError::InvalidTarget { .. }));
        assert_eq!(other.child_count(), 0);
    }

    #[test]
    fn test_leaf_target_rejected() {
        let mut ctx = MergeContext::new(false);
        let mut target = tagged(leaf("x"), Revision::Target);
        let tree = left_tree();
        let op = Operation::add(&mut ctx, Cow::Borrowed(&tree), &target, None, false);
        let err = op.apply(&mut target, &mut ctx).unwrap_err();
        assert!(matches!(err, MergeError::NotAContainer(_)));
    }

    #[test]
    fn test_conflict_wraps_both_alternatives() {
        let mut ctx = MergeContext::new(false);
        let mut target = container(&mut ctx);
        let l = tagged(leaf("m1"), Revision::Left);
        let r = tagged(leaf("m2"), Revision::Right);
        Operation::conflict(&mut ctx, Some(&l), Some(&r), &target, Some("left".into()), Some("right".into()))
            .apply(&mut target, &mut ctx)
            .unwrap();

        let created = &target.children()[0];
        assert!(created.is_conflict());
        assert_eq!(ctx.statistics.conflicts, 1);
        assert_eq!(
            created.render(),
            "<<<<<<< left\nm1\n=======\nm2\n>>>>>>> right"
        );
    }

    #[test]
    fn test_conditional_conflict_builds_choice() {
        let mut ctx = MergeContext::new(true);
        let mut target = container(&mut ctx);
        let l = tagged(leaf("m1"), Revision::Left);
        let r = tagged(leaf("m2"), Revision::Right);
        Operation::conflict(&mut ctx, Some(&l), Some(&r), &target, Some("A".into()), Some("B".into()))
            .apply(&mut target, &mut ctx)
            .unwrap();

        let created = &target.children()[0];
        assert!(created.is_choice());
        let conditions: Vec<&str> = created.variants().iter().map(|v| v.condition.as_str()).collect();
        assert_eq!(conditions, vec!["A", "B"]);
        assert_eq!(ctx.statistics.conflicts, 0);
    }

    #[test]
    fn test_conditional_delete_keeps_variant() {
        let mut ctx = MergeContext::new(true);
        let mut target = container(&mut ctx);
        let tree = left_tree();
        Operation::delete(&mut ctx, &tree.children()[0], &target, Some("A".into()))
            .apply(&mut target, &mut ctx)
            .unwrap();

        assert!(target.children()[0].is_choice());
        let stats: &MergeStatistics = &ctx.statistics;
        assert_eq!(stats.totals().deleted, 1);
        assert_eq!(stats.totals().choices, 1);
    }
}

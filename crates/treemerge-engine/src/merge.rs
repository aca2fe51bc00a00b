//! Operation derivation: walks the matched input trees once and builds the
//! merge result by applying operations to an initially empty output tree.
//!
//! For every pair of matched nodes the merge copies the left node (without
//! children) into the output and then decides, child by child, whether a
//! child is kept, added, deleted or in conflict. Which rules apply depends on
//! whether the children are ordered:
//!
//! - **ordered**: both child lists are walked with a cursor each; two
//!   simultaneous insertions at the same position conflict
//! - **unordered**: every child is handled on its own
//!
//! A child that exists in base but not on the other side was deleted there.
//! The deletion wins unless the surviving side changed the child, in which
//! case the result is a conflict with an absent alternative.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::error::MergeError;
use crate::matcher::Matcher;
use crate::matching::Matchings;
use crate::operations::{Operation, OperationRecord};
use crate::stats::{MergeStatistics, ScenarioStats};
use crate::tree::AstNode;
use crate::types::{MergeScenario, NodeId, NodeRef, Revision};

/// Mutable state shared by all operations of one merge invocation.
#[derive(Debug, Default)]
pub struct MergeContext {
    /// Conditions attached to operations turn into choice nodes.
    pub(crate) conditional: bool,
    pub statistics: MergeStatistics,
    sequence: u64,
    next_output_id: NodeId,
    log: Vec<OperationRecord>,
}

impl MergeContext {
    pub fn new(conditional: bool) -> Self {
        Self {
            conditional,
            ..Default::default()
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.conditional
    }

    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn next_output_id(&mut self) -> NodeId {
        let id = self.next_output_id;
        self.next_output_id += 1;
        id
    }

    /// A fresh, empty output container.
    pub(crate) fn output_root(&mut self) -> AstNode {
        let mut root = AstNode::empty(Revision::Target);
        root.meta_mut().id = self.next_output_id();
        root
    }

    /// Appends `node` to an output node's children, giving it an output
    /// identity so that it can serve as the target of later operations.
    pub(crate) fn push(&mut self, children: &mut Vec<AstNode>, mut node: AstNode) -> NodeRef {
        let id = self.next_output_id();
        let meta = node.meta_mut();
        meta.revision = Revision::Target;
        meta.id = id;
        let created = node.node_ref();
        children.push(node);
        created
    }

    pub(crate) fn record(&mut self, record: OperationRecord) {
        self.log.push(record);
    }

    /// Every applied operation in application order.
    pub fn log(&self) -> &[OperationRecord] {
        &self.log
    }

    /// Hands out the counters gathered so far and starts from zero.
    pub(crate) fn take_statistics(&mut self) -> MergeStatistics {
        std::mem::take(&mut self.statistics)
    }

    pub fn into_parts(self) -> (Vec<OperationRecord>, MergeStatistics) {
        (self.log, self.statistics)
    }
}

/// Matchings of one scenario, indexed per node and partner revision.
pub(crate) struct MatchStore<'a> {
    nodes: HashMap<NodeRef, &'a AstNode>,
    partners: HashMap<NodeRef, HashMap<Revision, NodeRef>>,
}

impl<'a> MatchStore<'a> {
    pub fn new(trees: &[&'a AstNode]) -> Self {
        let nodes = trees
            .iter()
            .flat_map(|t| t.walk())
            .map(|n| (n.node_ref(), n))
            .collect();
        Self {
            nodes,
            partners: HashMap::new(),
        }
    }

    /// Stores the one-to-one reduction of `matchings`. Only pairs with a
    /// positive score whose nodes match are kept; look-ahead pairs with
    /// differing roots only contribute through their descendants.
    pub fn store(&mut self, matchings: &Matchings) -> usize {
        let mut stored = 0;
        for m in matchings.optimized().iter().filter(|m| m.score() > 0) {
            let (Some(a), Some(b)) = (self.nodes.get(&m.left()), self.nodes.get(&m.right())) else {
                continue;
            };
            if !labels_match(a, b) {
                trace!(left = %m.left(), right = %m.right(), "skipping look-ahead matching");
                continue;
            }
            self.partners
                .entry(m.left())
                .or_default()
                .insert(m.right().revision, m.right());
            self.partners
                .entry(m.right())
                .or_default()
                .insert(m.left().revision, m.left());
            stored += 1;
        }
        stored
    }

    pub fn partner(&self, node: &AstNode, revision: Revision) -> Option<NodeRef> {
        self.partners
            .get(&node.node_ref())
            .and_then(|p| p.get(&revision))
            .copied()
    }

    pub fn partner_node(&self, node: &AstNode, revision: Revision) -> Option<&'a AstNode> {
        self.partner(node, revision)
            .and_then(|r| self.nodes.get(&r))
            .copied()
    }

    pub fn has_partner(&self, node: &AstNode, revision: Revision) -> bool {
        self.partner(node, revision).is_some()
    }
}

/// Labels match, looking through the variants of choice nodes.
fn labels_match(a: &AstNode, b: &AstNode) -> bool {
    a.matches(b)
        || a.variants().iter().any(|v| v.node.matches(b))
        || b.variants().iter().any(|v| v.node.matches(a))
}

fn root_score(matchings: &Matchings, left: &AstNode, right: &AstNode) -> usize {
    matchings
        .get(left.node_ref(), right.node_ref())
        .map_or(0, |m| m.score())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

struct TreeMerger<'a, 'c> {
    store: MatchStore<'a>,
    ctx: &'c mut MergeContext,
    left_rev: Revision,
    base_rev: Revision,
    right_rev: Revision,
    left_condition: String,
    right_condition: String,
    /// Input nodes already merged with their partner.
    merged: HashSet<NodeRef>,
}

impl<'a> TreeMerger<'a, '_> {
    fn condition(&self, side: Side) -> String {
        match side {
            Side::Left => self.left_condition.clone(),
            Side::Right => self.right_condition.clone(),
        }
    }

    fn other_rev(&self, side: Side) -> Revision {
        match side {
            Side::Left => self.right_rev,
            Side::Right => self.left_rev,
        }
    }

    fn apply(&mut self, op: Operation<'a>, target: &mut AstNode) -> Result<(), MergeError> {
        op.apply(target, self.ctx)
    }

    /// Whether `node` differs from its base version: it has no base partner,
    /// a different size, or a descendant without a matching base node.
    fn has_changes(&self, node: &AstNode) -> bool {
        let Some(base) = self.store.partner_node(node, self.base_rev) else {
            return true;
        };
        if base.tree_size() != node.tree_size() {
            return true;
        }
        node.preorder().into_iter().skip(1).any(|d| {
            self.store
                .partner_node(d, self.base_rev)
                .is_none_or(|b| !b.matches(d))
        })
    }

    /// Partner of `node` among `candidates`, the children of the parent's
    /// counterpart.
    fn partner_among(
        &self,
        node: &AstNode,
        revision: Revision,
        candidates: &'a [AstNode],
    ) -> Option<&'a AstNode> {
        let partner = self.store.partner(node, revision)?;
        candidates.iter().find(|c| c.node_ref() == partner)
    }

    /// Merges two matched nodes into `target`: the left node is copied without
    /// children and its children are merged below the copy.
    fn merge_matched(
        &mut self,
        left: &'a AstNode,
        right: &'a AstNode,
        target: &mut AstNode,
    ) -> Result<(), MergeError> {
        self.merged.insert(left.node_ref());
        self.merged.insert(right.node_ref());

        if left.is_choice() || right.is_choice() {
            let (mut choice, other, side) = if left.is_choice() {
                (left.clone(), right, Side::Right)
            } else {
                (right.clone(), left, Side::Left)
            };
            choice.add_variant(self.condition(side), other.clone());
            let op = Operation::add(self.ctx, Cow::Owned(choice), target, None, false);
            return self.apply(op, target);
        }

        let op = Operation::add(self.ctx, Cow::Borrowed(left), target, None, true);
        self.apply(op, target)?;
        let target_ref = target.node_ref();
        let child_target = target
            .children_mut()
            .and_then(|c| c.last_mut())
            .ok_or(MergeError::NotAContainer(target_ref))?;

        let empty;
        let base = match self.store.partner_node(left, self.base_rev) {
            Some(b) => b,
            None => {
                empty = AstNode::empty(self.base_rev);
                &empty
            }
        };
        self.merge_pair(left, base, right, child_target)
    }

    /// Merges the children of a matched pair into `target`, which must still
    /// be empty.
    fn merge_pair(
        &mut self,
        left: &'a AstNode,
        base: &AstNode,
        right: &'a AstNode,
        target: &mut AstNode,
    ) -> Result<(), MergeError> {
        if !target.children().is_empty() {
            return Err(MergeError::TargetNotEmpty(target.node_ref()));
        }
        trace!(left = %left.node_ref(), base = %base.node_ref(), right = %right.node_ref(), "merging");

        let (lc, rc) = (left.children(), right.children());
        if (base.is_empty() || base.child_count() > 0) && (lc.is_empty() || rc.is_empty()) {
            if lc.is_empty() && rc.is_empty() {
                return Ok(());
            }
            let (side, parent) = if lc.is_empty() {
                (Side::Right, right)
            } else {
                (Side::Left, left)
            };
            let changed = self.has_changes(parent);
            for child in parent.children() {
                let op = if changed {
                    self.conflict_with_absent(side, child, target)
                } else {
                    let condition = Some(self.condition(side));
                    Operation::delete(self.ctx, child, target, condition)
                };
                self.apply(op, target)?;
            }
            return Ok(());
        }

        if left.has_ordered_children() || right.has_ordered_children() {
            self.merge_ordered(lc, rc, target)
        } else {
            self.merge_unordered(lc, rc, target)
        }
    }

    fn conflict_with_absent(
        &mut self,
        side: Side,
        node: &'a AstNode,
        target: &AstNode,
    ) -> Operation<'a> {
        let (left, right) = match side {
            Side::Left => (Some(node), None),
            Side::Right => (None, Some(node)),
        };
        let (lc, rc) = (self.condition(Side::Left), self.condition(Side::Right));
        Operation::conflict(self.ctx, left, right, target, Some(lc), Some(rc))
    }

    /// A child without a partner on the other side: deleted there if it
    /// exists in base, otherwise inserted on this side.
    fn unmatched(
        &mut self,
        side: Side,
        node: &'a AstNode,
        target: &mut AstNode,
    ) -> Result<(), MergeError> {
        let condition = Some(self.condition(side));
        let op = if self.store.has_partner(node, self.base_rev) {
            if self.has_changes(node) {
                self.conflict_with_absent(side, node, target)
            } else {
                Operation::delete(self.ctx, node, target, condition)
            }
        } else {
            Operation::add(self.ctx, Cow::Borrowed(node), target, condition, false)
        };
        self.apply(op, target)
    }

    /// Merges `node` with its partner among `others`.
    fn merge_with_partner(
        &mut self,
        side: Side,
        node: &'a AstNode,
        partner: &'a AstNode,
        target: &mut AstNode,
    ) -> Result<(), MergeError> {
        // Stored matchings are one-to-one, so a merged partner implies a
        // merged `node`, which the callers skip.
        debug_assert!(!self.merged.contains(&partner.node_ref()));
        match side {
            Side::Left => self.merge_matched(node, partner, target),
            Side::Right => self.merge_matched(partner, node, target),
        }
    }

    fn merge_ordered(
        &mut self,
        lc: &'a [AstNode],
        rc: &'a [AstNode],
        target: &mut AstNode,
    ) -> Result<(), MergeError> {
        let left_partners: Vec<_> = lc
            .iter()
            .map(|c| self.partner_among(c, self.right_rev, rc))
            .collect();
        let right_partners: Vec<_> = rc
            .iter()
            .map(|c| self.partner_among(c, self.left_rev, lc))
            .collect();

        let (mut i, mut j) = (0, 0);
        while i < lc.len() || j < rc.len() {
            if lc.get(i).is_some_and(|n| self.merged.contains(&n.node_ref())) {
                i += 1;
                continue;
            }
            if rc.get(j).is_some_and(|n| self.merged.contains(&n.node_ref())) {
                j += 1;
                continue;
            }

            let left_insertion = lc.get(i).filter(|_| left_partners[i].is_none());
            let right_insertion = rc.get(j).filter(|_| right_partners[j].is_none());

            if let Some(l) = left_insertion {
                if !self.store.has_partner(l, self.base_rev) {
                    if let Some(r) = right_insertion.filter(|r| !self.store.has_partner(r, self.base_rev)) {
                        // Both sides inserted at the same position.
                        let (lcond, rcond) = (self.condition(Side::Left), self.condition(Side::Right));
                        let op = Operation::conflict(
                            self.ctx,
                            Some(l),
                            Some(r),
                            target,
                            Some(lcond),
                            Some(rcond),
                        );
                        self.apply(op, target)?;
                        i += 1;
                        j += 1;
                        continue;
                    }
                }
                self.unmatched(Side::Left, l, target)?;
                i += 1;
                continue;
            }
            if let Some(r) = right_insertion {
                self.unmatched(Side::Right, r, target)?;
                j += 1;
                continue;
            }

            match (lc.get(i), rc.get(j)) {
                (Some(l), Some(r)) if left_partners[i].is_some_and(|p| p.node_ref() == r.node_ref()) => {
                    self.merge_matched(l, r, target)?;
                    i += 1;
                    j += 1;
                }
                (Some(l), _) => {
                    if let Some(p) = left_partners[i] {
                        self.merge_with_partner(Side::Left, l, p, target)?;
                    }
                    i += 1;
                }
                (None, Some(r)) => {
                    if let Some(p) = right_partners[j] {
                        self.merge_with_partner(Side::Right, r, p, target)?;
                    }
                    j += 1;
                }
                (None, None) => break,
            }
        }
        Ok(())
    }

    fn merge_unordered(
        &mut self,
        lc: &'a [AstNode],
        rc: &'a [AstNode],
        target: &mut AstNode,
    ) -> Result<(), MergeError> {
        for (side, own, others, other_rev) in [
            (Side::Left, lc, rc, self.other_rev(Side::Left)),
            (Side::Right, rc, lc, self.other_rev(Side::Right)),
        ] {
            for child in own {
                if self.merged.contains(&child.node_ref()) {
                    continue;
                }
                match self.partner_among(child, other_rev, others) {
                    Some(partner) => self.merge_with_partner(side, child, partner, target)?,
                    None => self.unmatched(side, child, target)?,
                }
            }
        }
        Ok(())
    }
}

/// Merges one two- or three-way scenario. `conditions` name the left and
/// right input for conditional merging.
pub(crate) fn merge_scenario(
    matcher: &mut Matcher,
    scenario: &MergeScenario,
    ctx: &mut MergeContext,
    conditions: (String, String),
) -> Result<(AstNode, ScenarioStats), MergeError> {
    scenario.validate()?;
    let (left, base, right) = (&scenario.left, &scenario.base, &scenario.right);
    let mut store = MatchStore::new(&[left, base, right]);

    if !base.is_empty() {
        for side in [left, right] {
            let ms = matcher.match_trees(base, side);
            if root_score(&ms, base, side) == 0 {
                debug!(base = %base.node_ref(), other = %side.node_ref(), "no matches against base");
            }
            store.store(&ms);
        }
    }
    let ms = matcher.match_trees(left, right);
    let score = root_score(&ms, left, right);
    let stored = store.store(&ms);
    debug!(score, stored, "matched left and right");

    let conflicts_before = ctx.statistics.conflicts;
    let (left_condition, right_condition) = conditions;
    let mut merger = TreeMerger {
        store,
        ctx,
        left_rev: left.revision(),
        base_rev: base.revision(),
        right_rev: right.revision(),
        left_condition,
        right_condition,
        merged: HashSet::new(),
    };

    let mut container = merger.ctx.output_root();
    if merger.store.partner(left, right.revision()) == Some(right.node_ref()) {
        merger.merge_matched(left, right, &mut container)?;
    } else {
        debug!(left = %left.node_ref(), right = %right.node_ref(), "roots do not match");
        let (lc, rc) = (merger.condition(Side::Left), merger.condition(Side::Right));
        let op = Operation::conflict(merger.ctx, Some(left), Some(right), &container, Some(lc), Some(rc));
        merger.apply(op, &mut container)?;
    }

    let mut tree = container
        .children_mut()
        .and_then(|c| c.pop())
        .unwrap_or_else(|| AstNode::empty(Revision::Target));
    tree.renumber(Revision::Target);

    let stats = ScenarioStats {
        merge_type: scenario.merge_type,
        left_size: left.tree_size(),
        base_size: if base.is_empty() { 0 } else { base.tree_size() },
        right_size: right.tree_size(),
        root_score: score,
        conflicts: merger.ctx.statistics.conflicts - conflicts_before,
        elements: merger.ctx.statistics.totals(),
    };
    Ok((tree, stats))
}

//! Scored node correspondences between two trees.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::MatchingsError;
use crate::tree::AstNode;
use crate::types::NodeRef;

/// A scored correspondence between one left-tree node and one right-tree node.
///
/// The score counts the transitively matched nodes of both subtrees, so a
/// pair of identical subtrees of size `k` scores `k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matching {
    left: NodeRef,
    right: NodeRef,
    left_size: usize,
    right_size: usize,
    score: usize,
    algorithm: &'static str,
    /// The mismatching pair whose look-ahead produced this matching.
    origin: Option<(NodeRef, NodeRef)>,
}

impl Matching {
    pub fn new(left: &AstNode, right: &AstNode, score: usize, algorithm: &'static str) -> Self {
        Self {
            left: left.node_ref(),
            right: right.node_ref(),
            left_size: left.tree_size(),
            right_size: right.tree_size(),
            score,
            algorithm,
            origin: None,
        }
    }

    pub fn left(&self) -> NodeRef {
        self.left
    }

    pub fn right(&self) -> NodeRef {
        self.right
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    pub fn origin(&self) -> Option<(NodeRef, NodeRef)> {
        self.origin
    }

    pub fn left_size(&self) -> usize {
        self.left_size
    }

    pub fn right_size(&self) -> usize {
        self.right_size
    }

    /// `2 * score / (left_size + right_size)`.
    pub fn percentage(&self) -> f32 {
        let total = self.left_size + self.right_size;
        if total == 0 {
            return 0.0;
        }
        (2 * self.score) as f32 / total as f32
    }

    pub fn is_full(&self) -> bool {
        2 * self.score == self.left_size + self.right_size
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        self.left == node || self.right == node
    }

    /// The node on the other side of `node`, if `node` is part of this matching.
    pub fn partner(&self, node: NodeRef) -> Option<NodeRef> {
        if self.left == node {
            Some(self.right)
        } else if self.right == node {
            Some(self.left)
        } else {
            None
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(self.left, self.right)
    }

    pub(crate) fn with_origin(mut self, origin: (NodeRef, NodeRef)) -> Self {
        if self.origin.is_none() {
            self.origin = Some(origin);
        }
        self
    }

    /// Re-attributes one side of the matching to `replacement`. Used when a
    /// choice variant's matching is collapsed onto the choice node itself.
    pub(crate) fn substitute(&mut self, replaced: NodeRef, replacement: &AstNode) {
        if self.left == replaced {
            self.left = replacement.node_ref();
        } else if self.right == replaced {
            self.right = replacement.node_ref();
        }
    }
}

/// Order-independent key of a node pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey(NodeRef, NodeRef);

impl PairKey {
    pub fn new(a: NodeRef, b: NodeRef) -> Self {
        if a <= b { Self(a, b) } else { Self(b, a) }
    }
}

/// A set of matchings, unique by node pair.
#[derive(Debug, Clone, Default)]
pub struct Matchings {
    by_pair: BTreeMap<PairKey, Matching>,
    by_node: HashMap<NodeRef, Vec<PairKey>>,
}

impl Matchings {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding just `matching`.
    pub fn of(matching: Matching) -> Self {
        let mut set = Self::new();
        set.insert(matching);
        set
    }

    /// Inserts `matching` unless its pair is already present. Returns whether
    /// the set changed.
    pub fn insert(&mut self, matching: Matching) -> bool {
        let key = matching.key();
        if self.by_pair.contains_key(&key) {
            return false;
        }
        for node in [matching.left, matching.right] {
            self.by_node.entry(node).or_default().push(key);
        }
        self.by_pair.insert(key, matching);
        true
    }

    pub fn extend(&mut self, other: Matchings) {
        for m in other.by_pair.into_values() {
            self.insert(m);
        }
    }

    pub fn len(&self) -> usize {
        self.by_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Matching> {
        self.by_pair.values()
    }

    pub fn get(&self, a: NodeRef, b: NodeRef) -> Option<&Matching> {
        self.by_pair.get(&PairKey::new(a, b))
    }

    pub fn get_mut(&mut self, a: NodeRef, b: NodeRef) -> Option<&mut Matching> {
        self.by_pair.get_mut(&PairKey::new(a, b))
    }

    /// Every matching `node` takes part in.
    pub fn get_for(&self, node: NodeRef) -> impl Iterator<Item = &Matching> + '_ {
        self.by_node
            .get(&node)
            .into_iter()
            .flatten()
            .filter_map(|k| self.by_pair.get(k))
    }

    /// The first matching with `node` on its left side.
    pub fn get_left(&self, node: NodeRef) -> Option<&Matching> {
        self.get_for(node).find(|m| m.left == node)
    }

    /// The first matching with `node` on its right side.
    pub fn get_right(&self, node: NodeRef) -> Option<&Matching> {
        self.get_for(node).find(|m| m.right == node)
    }

    /// Drops a matching, returning it if present.
    pub(crate) fn remove(&mut self, a: NodeRef, b: NodeRef) -> Option<Matching> {
        let key = PairKey::new(a, b);
        let removed = self.by_pair.remove(&key)?;
        for node in [removed.left, removed.right] {
            if let Some(keys) = self.by_node.get_mut(&node) {
                keys.retain(|k| *k != key);
            }
        }
        Some(removed)
    }

    /// Reduces the set so that every node appears in at most one matching.
    ///
    /// Matchings are claimed greedily by descending percentage, then
    /// descending score, then ascending pair key; a matching is kept only if
    /// neither of its nodes has been claimed yet. Score-0 matchings are
    /// dropped.
    pub fn optimized(&self) -> Matchings {
        let mut candidates: Vec<&Matching> = self.iter().filter(|m| m.score > 0).collect();
        candidates.sort_by(|a, b| {
            b.percentage()
                .partial_cmp(&a.percentage())
                .unwrap_or(Ordering::Equal)
                .then(b.score.cmp(&a.score))
                .then(a.key().cmp(&b.key()))
        });

        let mut claimed = HashSet::new();
        let mut result = Matchings::new();
        for m in candidates {
            if claimed.contains(&m.left) || claimed.contains(&m.right) {
                continue;
            }
            claimed.insert(m.left);
            claimed.insert(m.right);
            result.insert(m.clone());
        }
        result
    }

    /// Opt-in consistency pass: every matching must pair a node of `left`
    /// with a node of `right`, and with `one_to_one` no node may appear in
    /// more than one matching.
    pub fn validate(
        &self,
        left: &AstNode,
        right: &AstNode,
        one_to_one: bool,
    ) -> Result<(), MatchingsError> {
        let left_nodes: HashSet<NodeRef> = left.walk().iter().map(|n| n.node_ref()).collect();
        let right_nodes: HashSet<NodeRef> = right.walk().iter().map(|n| n.node_ref()).collect();

        let mut seen = HashSet::new();
        for m in self.iter() {
            if !left_nodes.contains(&m.left) {
                return Err(MatchingsError::ForeignNode(m.left));
            }
            if !right_nodes.contains(&m.right) {
                return Err(MatchingsError::ForeignNode(m.right));
            }
            if one_to_one {
                for node in [m.left, m.right] {
                    if !seen.insert(node) {
                        return Err(MatchingsError::Duplicate(node));
                    }
                }
            }
        }
        Ok(())
    }
}

impl IntoIterator for Matchings {
    type Item = Matching;
    type IntoIter = std::collections::btree_map::IntoValues<PairKey, Matching>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_pair.into_values()
    }
}

impl FromIterator<Matching> for Matchings {
    fn from_iter<I: IntoIterator<Item = Matching>>(iter: I) -> Self {
        let mut set = Matchings::new();
        for m in iter {
            set.insert(m);
        }
        set
    }
}

//! Identical-subtree pre-pass.
//!
//! Before the top-down matching starts, subtrees whose content hash occurs
//! exactly once in each tree are paired node by node. The dispatcher then
//! answers any pair recorded here without recursing.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::matching::{Matching, Matchings};
use crate::tree::{AstNode, TreeHash};
use crate::types::NodeRef;

pub const NAME: &str = "identical-subtree";

#[derive(Debug, Clone, Default)]
pub struct IdenticalSubtreeMatcher {
    pairs: HashMap<NodeRef, NodeRef>,
}

impl IdenticalSubtreeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// Pairs the uniquely shared subtrees of `left` and `right`, replacing any
    /// earlier result.
    pub fn precompute(&mut self, left: &AstNode, right: &AstNode) {
        self.pairs.clear();

        let mut left_hashes = HashMap::new();
        left.hash_all(&mut left_hashes);
        let mut right_hashes = HashMap::new();
        right.hash_all(&mut right_hashes);

        let left_unique = unique_hashes(left, &left_hashes);
        let right_unique = unique_hashes(right, &right_hashes);
        self.pair_subtrees(left, &left_hashes, &left_unique, &right_unique);

        debug!(pairs = self.pairs.len(), "identical subtrees paired");
    }

    fn pair_subtrees(
        &mut self,
        left: &AstNode,
        left_hashes: &HashMap<NodeRef, TreeHash>,
        left_unique: &HashMap<TreeHash, &AstNode>,
        right_unique: &HashMap<TreeHash, &AstNode>,
    ) {
        let shared = left_hashes
            .get(&left.node_ref())
            .filter(|h| left_unique.contains_key(*h))
            .and_then(|h| right_unique.get(h));

        match shared {
            Some(right) => {
                for (l, r) in left.preorder().into_iter().zip(right.preorder()) {
                    self.pairs.insert(l.node_ref(), r.node_ref());
                }
            }
            None => {
                for child in left.children() {
                    self.pair_subtrees(child, left_hashes, left_unique, right_unique);
                }
            }
        }
    }

    pub fn has_matched(&self, left: &AstNode, right: &AstNode) -> bool {
        self.pairs.get(&left.node_ref()) == Some(&right.node_ref())
    }

    /// Matchings for a pair recorded by [`Self::precompute`]: every node pair
    /// of the two subtrees, scored by its subtree size. Empty for pairs that
    /// were not recorded.
    pub fn match_nodes(&self, left: &AstNode, right: &AstNode) -> Matchings {
        if !self.has_matched(left, right) {
            return Matchings::new();
        }
        left.preorder()
            .into_iter()
            .zip(right.preorder())
            .map(|(l, r)| Matching::new(l, r, l.tree_size(), NAME))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Subtree hashes that occur exactly once in `tree`.
fn unique_hashes<'a>(
    tree: &'a AstNode,
    hashes: &HashMap<NodeRef, TreeHash>,
) -> HashMap<TreeHash, &'a AstNode> {
    let mut unique = HashMap::new();
    let mut repeated = HashSet::new();
    for node in tree.preorder() {
        let Some(hash) = hashes.get(&node.node_ref()) else {
            continue;
        };
        if unique.insert(*hash, node).is_some() {
            repeated.insert(*hash);
        }
    }
    for hash in repeated {
        unique.remove(&hash);
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::*;
    use crate::matcher::{Matcher, MatcherConfig};
    use crate::types::Revision;
    use proptest::prelude::*;

    #[test]
    fn test_pairs_unique_shared_subtree() {
        let l = tagged(
            ordered("root", vec![ordered("f", vec![leaf("a"), leaf("b")]), leaf("x")]),
            Revision::Left,
        );
        let r = tagged(
            ordered("root", vec![leaf("y"), ordered("f", vec![leaf("a"), leaf("b")])]),
            Revision::Right,
        );
        let mut m = IdenticalSubtreeMatcher::new();
        m.precompute(&l, &r);

        let (lf, rf) = (&l.children()[0], &r.children()[1]);
        assert!(m.has_matched(lf, rf));
        assert!(!m.has_matched(&l, &r));
        assert_eq!(m.len(), 3);

        let ms = m.match_nodes(lf, rf);
        assert_eq!(ms.len(), 3);
        let root = ms.get(lf.node_ref(), rf.node_ref()).unwrap();
        assert_eq!(root.score(), 3);
        assert!(root.is_full());
        assert_eq!(
            ms.get(lf.children()[1].node_ref(), rf.children()[1].node_ref())
                .unwrap()
                .score(),
            1
        );
    }

    #[test]
    fn test_repeated_subtrees_are_skipped() {
        let l = tagged(ordered("root", vec![leaf("a"), leaf("a")]), Revision::Left);
        let r = tagged(ordered("root", vec![leaf("a")]), Revision::Right);
        let mut m = IdenticalSubtreeMatcher::new();
        m.precompute(&l, &r);
        assert!(m.is_empty());
        assert!(m.match_nodes(&l.children()[0], &r.children()[0]).is_empty());
    }

    #[test]
    fn test_identical_trees_pair_every_node() {
        let l = tagged(ordered("root", vec![leaf("a"), leaf("b")]), Revision::Left);
        let r = tagged(ordered("root", vec![leaf("a"), leaf("b")]), Revision::Right);
        let mut m = IdenticalSubtreeMatcher::new();
        m.precompute(&l, &r);
        assert_eq!(m.len(), l.tree_size());
        for (a, b) in l.preorder().into_iter().zip(r.preorder()) {
            assert!(m.has_matched(a, b));
        }
    }

    proptest! {
        #[test]
        fn prop_identical_trees_match_fully(tree in arb_tree()) {
            let l = tagged(tree.clone(), Revision::Left);
            let r = tagged(tree, Revision::Right);
            let mut m = IdenticalSubtreeMatcher::new();
            m.precompute(&l, &r);

            let direct = m.match_nodes(&l, &r);
            let dispatched = Matcher::new(&MatcherConfig::default())
                .unwrap()
                .match_trees(&l, &r);

            for ms in [&direct, &dispatched] {
                prop_assert_eq!(ms.len(), l.tree_size());
                let root = ms.get(l.node_ref(), r.node_ref()).unwrap();
                prop_assert_eq!(root.score(), l.tree_size());
                prop_assert!(root.is_full());
                prop_assert_eq!(root.percentage(), 1.0);
                for (a, b) in l.preorder().into_iter().zip(r.preorder()) {
                    let pair = ms.get(a.node_ref(), b.node_ref());
                    prop_assert!(pair.is_some_and(|p| p.score() == a.tree_size() && p.is_full()));
                }
            }
        }
    }
}

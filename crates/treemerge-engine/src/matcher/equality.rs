//! Positional equality matcher.
//!
//! Compares children index by index without any alignment. Cheap, and enough
//! to tell whether two subtrees are identical.

use tracing::trace;

use super::{MatchStrategy, Matcher};
use crate::matching::{Matching, Matchings};
use crate::tree::AstNode;

pub const NAME: &str = "equality";

#[derive(Debug, Clone, Copy, Default)]
pub struct EqualityMatcher;

impl EqualityMatcher {
    /// Matches `left` and `right` positionally. The root matching scores the
    /// sum of the fully matched child pairs, plus one if the two subtrees are
    /// identical all the way down.
    pub fn match_trees(&self, left: &AstNode, right: &AstNode) -> Matchings {
        let mut out = Matchings::new();
        self.collect(left, right, &mut out);
        out
    }

    fn collect(&self, left: &AstNode, right: &AstNode, out: &mut Matchings) -> Matching {
        let mut score = 0;
        let mut identical = true;

        for (lc, rc) in left.children().iter().zip(right.children()) {
            let child = self.collect(lc, rc, out);
            if child.is_full() {
                score += child.score();
            } else {
                identical = false;
            }
        }

        if identical && left.matches(right) && left.child_count() == right.child_count() {
            score += 1;
        } else {
            trace!(left = %left.node_ref(), right = %right.node_ref(), "subtrees differ");
        }

        let matching = Matching::new(left, right, score, NAME);
        out.insert(matching.clone());
        matching
    }
}

impl MatchStrategy for EqualityMatcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn match_nodes(
        &self,
        _matcher: &mut Matcher,
        left: &AstNode,
        right: &AstNode,
        _look_ahead: u32,
    ) -> Matchings {
        self.match_trees(left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::*;
    use crate::types::Revision;
    use proptest::prelude::*;

    #[test]
    fn test_single_difference_breaks_root() {
        let l = tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Left);
        let r = tagged(ordered("A", vec![leaf("x"), leaf("z")]), Revision::Right);
        let ms = EqualityMatcher.match_trees(&l, &r);

        // Only the fully matched `x` pair contributes.
        assert_eq!(ms.get(l.node_ref(), r.node_ref()).unwrap().score(), 1);
        let y_z = ms
            .get(l.children()[1].node_ref(), r.children()[1].node_ref())
            .unwrap();
        assert_eq!(y_z.score(), 0);
    }

    #[test]
    fn test_extra_child_breaks_root() {
        let l = tagged(ordered("A", vec![leaf("x")]), Revision::Left);
        let r = tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Right);
        let ms = EqualityMatcher.match_trees(&l, &r);
        assert_eq!(ms.get(l.node_ref(), r.node_ref()).unwrap().score(), 1);
    }

    proptest! {
        #[test]
        fn prop_self_match_scores_tree_size(tree in arb_tree()) {
            let l = tagged(tree.clone(), Revision::Left);
            let r = tagged(tree, Revision::Right);
            let ms = EqualityMatcher.match_trees(&l, &r);
            let root = ms.get(l.node_ref(), r.node_ref()).unwrap();
            prop_assert_eq!(root.score(), l.tree_size());
            prop_assert!(root.is_full());
        }
    }
}

//! Maximum common embedded subtree matcher for fully ordered subtrees.
//!
//! Each subtree is encoded as a balanced sequence: an open token per node,
//! followed by its children's sequences and a close token. The size of the
//! largest common embedded subtree is then an LCS over sequence
//! decompositions (Lozano & Valiente).

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::trace;

use super::{LOOKAHEAD_FULL, LOOKAHEAD_OFF, MatchStrategy, Matcher, MatcherConfig};
use crate::matching::{Matching, Matchings};
use crate::tree::AstNode;

pub const NAME: &str = "mce";

/// Open token (index into the node table of its side) or close token.
type Token = Option<usize>;

#[derive(Debug, Clone, Copy)]
pub struct MceSubtreeMatcher {
    parallel: bool,
}

impl MceSubtreeMatcher {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    /// Size of the maximum common embedded subtree of `left` and `right`.
    pub fn common_subtree_size(left: &AstNode, right: &AstNode) -> usize {
        let mut lcs = Lcs::new(left, right);
        let (s, t) = (lcs.left_seq.clone(), lcs.right_seq.clone());
        lcs.lcs(&s, &t)
    }

    /// Scores the root pair and every child pair, fanning the child pairs out
    /// on the rayon pool when enabled.
    fn match_tree(
        &self,
        config: &MatcherConfig,
        left: &AstNode,
        right: &AstNode,
        look_ahead: u32,
    ) -> Matchings {
        let mut out = Matchings::of(Matching::new(
            left,
            right,
            Self::common_subtree_size(left, right),
            NAME,
        ));

        let pairs: Vec<(&AstNode, &AstNode)> = left
            .children()
            .iter()
            .flat_map(|l| right.children().iter().map(move |r| (l, r)))
            .collect();

        let children: Vec<Matchings> = if self.parallel {
            pairs
                .par_iter()
                .map(|(l, r)| recurse(config, l, r, look_ahead))
                .collect()
        } else {
            pairs
                .iter()
                .map(|(l, r)| recurse(config, l, r, look_ahead))
                .collect()
        };
        for ms in children {
            out.extend(ms);
        }
        out
    }
}

/// Applies the dispatcher's look-ahead rule to a child pair, then scores it
/// and its descendants.
fn recurse(config: &MatcherConfig, left: &AstNode, right: &AstNode, look_ahead: u32) -> Matchings {
    let mut budget = look_ahead;
    if !left.matches(right) {
        if budget == LOOKAHEAD_OFF {
            return Matchings::of(Matching::new(left, right, 0, NAME));
        }
        if budget != LOOKAHEAD_FULL {
            budget -= 1;
        }
    } else if config.look_ahead_enabled() {
        budget = config.look_ahead_for(left.category());
    }

    let mut out = Matchings::of(Matching::new(
        left,
        right,
        MceSubtreeMatcher::common_subtree_size(left, right),
        NAME,
    ));
    for l in left.children() {
        for r in right.children() {
            out.extend(recurse(config, l, r, budget));
        }
    }
    out
}

impl MatchStrategy for MceSubtreeMatcher {
    fn name(&self) -> &'static str {
        NAME
    }

    fn match_nodes(
        &self,
        matcher: &mut Matcher,
        left: &AstNode,
        right: &AstNode,
        look_ahead: u32,
    ) -> Matchings {
        let config = matcher.config().clone();
        let ms = self.match_tree(&config, left, right, look_ahead);
        trace!(left = %left.node_ref(), right = %right.node_ref(), matchings = ms.len(), "mce");
        ms
    }
}

/// Memoized LCS over balanced sequences of one left and one right subtree.
struct Lcs<'a> {
    left: Vec<&'a AstNode>,
    right: Vec<&'a AstNode>,
    left_seq: Vec<Token>,
    right_seq: Vec<Token>,
    memo: HashMap<(Vec<Token>, Vec<Token>), usize>,
}

impl<'a> Lcs<'a> {
    fn new(left: &'a AstNode, right: &'a AstNode) -> Self {
        let (mut l_nodes, mut l_seq) = (Vec::new(), Vec::new());
        encode(left, &mut l_nodes, &mut l_seq);
        let (mut r_nodes, mut r_seq) = (Vec::new(), Vec::new());
        encode(right, &mut r_nodes, &mut r_seq);
        Self {
            left: l_nodes,
            right: r_nodes,
            left_seq: l_seq,
            right_seq: r_seq,
            memo: HashMap::new(),
        }
    }

    fn lcs(&mut self, s: &[Token], t: &[Token]) -> usize {
        if s.is_empty() || t.is_empty() {
            return 0;
        }
        let key = (s.to_vec(), t.to_vec());
        if let Some(&cached) = self.memo.get(&key) {
            return cached;
        }

        let (s_head, s_tail) = partition(s);
        let (t_head, t_tail) = partition(t);

        let s_rest = [s_head, s_tail].concat();
        let t_rest = [t_head, t_tail].concat();
        let mut result = self.lcs(&s_rest, t).max(self.lcs(s, &t_rest));

        if let (Some(i), Some(j)) = (s[0], t[0]) {
            if self.left[i].matches(self.right[j]) {
                let c = self.lcs(s_head, t_head) + self.lcs(s_tail, t_tail) + 1;
                result = result.max(c);
            }
        }

        self.memo.insert(key, result);
        result
    }
}

fn encode<'a>(node: &'a AstNode, nodes: &mut Vec<&'a AstNode>, seq: &mut Vec<Token>) {
    nodes.push(node);
    seq.push(Some(nodes.len() - 1));
    for child in node.children() {
        encode(child, nodes, seq);
    }
    seq.push(None);
}

/// Splits a non-empty sequence into the children of its first tree (head)
/// and the trees following it (tail).
fn partition(seq: &[Token]) -> (&[Token], &[Token]) {
    let mut depth = 0i64;
    for (idx, token) in seq.iter().enumerate() {
        depth += if token.is_some() { 1 } else { -1 };
        if depth == 0 {
            return (&seq[1..idx], &seq[idx + 1..]);
        }
    }
    (&[], &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::*;
    use crate::types::Revision;

    #[test]
    fn test_partition_splits_first_tree() {
        // (a (b) (c)) (d)
        let seq = vec![Some(0), Some(1), None, Some(2), None, None, Some(3), None];
        let (head, tail) = partition(&seq);
        assert_eq!(head, &[Some(1), None, Some(2), None]);
        assert_eq!(tail, &[Some(3), None]);
    }

    #[test]
    fn test_identical_trees_embed_fully() {
        let l = tagged(ordered("A", vec![ordered("B", vec![leaf("x")]), leaf("y")]), Revision::Left);
        let r = tagged(ordered("A", vec![ordered("B", vec![leaf("x")]), leaf("y")]), Revision::Right);
        assert_eq!(MceSubtreeMatcher::common_subtree_size(&l, &r), 4);
    }

    #[test]
    fn test_embedding_skips_inserted_level() {
        // A(x, y) is embedded in A(W(x), y) once W is contracted.
        let l = tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Left);
        let r = tagged(ordered("A", vec![ordered("W", vec![leaf("x")]), leaf("y")]), Revision::Right);
        assert_eq!(MceSubtreeMatcher::common_subtree_size(&l, &r), 3);
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let l = tagged(ordered("A", vec![leaf("x"), leaf("y"), leaf("z")]), Revision::Left);
        let r = tagged(ordered("A", vec![leaf("y"), leaf("x")]), Revision::Right);
        let config = MatcherConfig::default();

        let seq = MceSubtreeMatcher::new(false).match_tree(&config, &l, &r, 0);
        let par = MceSubtreeMatcher::new(true).match_tree(&config, &l, &r, 0);
        let scores = |ms: &Matchings| ms.iter().map(|m| (m.key(), m.score())).collect::<Vec<_>>();
        assert_eq!(scores(&seq), scores(&par));
        assert_eq!(seq.get(l.node_ref(), r.node_ref()).unwrap().score(), 2);
    }
}

//! Randomized cost-model matcher.
//!
//! Instead of matching top-down, this matcher searches the space of complete
//! matchings between two trees for one with a low cost. The cost of a
//! matching sums, per matched pair, penalties for:
//! - renaming (labels differ; eased for methods and classes)
//! - ancestry violations (children matched outside the partner's children)
//! - sibling-group breakup (siblings scattered over several families)
//! - ordering violations among ordered siblings
//!
//! plus a flat penalty per unmatched node. The search itself lives in
//! [`search`]; the cost terms and their bounds in [`graph`].
//!
//! Reference: Lessenich, Apel, Kästner, Seibt, Siegmund, "Renaming and
//! Shifted Code in Structured Merging: Looking Ahead for Precision and
//! Performance" (ASE 2017).

mod graph;
pub mod params;
mod search;

use std::collections::HashSet;

use tracing::debug;

use crate::error::{ConfigError, MatchingsError};
use crate::matcher::{MatchStrategy, Matcher};
use crate::matching::{Matching, Matchings};
use crate::tree::AstNode;

use graph::{CostGraph, Edge, Ix, TreeArena};
use search::Search;

pub use params::CostModelParams;

pub const NAME: &str = "cost-model";

#[derive(Debug, Clone)]
pub struct CostModelMatcher {
    params: CostModelParams,
}

impl CostModelMatcher {
    pub fn new(params: CostModelParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &CostModelParams {
        &self.params
    }

    /// Searches for a low-cost matching of the two trees.
    pub fn match_trees(&self, left: &AstNode, right: &AstNode) -> Matchings {
        self.run(left, right, &Matchings::new())
    }

    /// Like [`Self::match_trees`], but every matching of the one-to-one
    /// reduction of `fixed` is kept as is.
    pub fn match_with_fixed(&self, left: &AstNode, right: &AstNode, fixed: &Matchings) -> Matchings {
        self.run(left, right, fixed)
    }

    fn run(&self, left: &AstNode, right: &AstNode, fixed: &Matchings) -> Matchings {
        let graph = CostGraph::new(left, right, self.params.clone());
        let pre_fixed: Vec<Edge> = fixed
            .optimized()
            .iter()
            .filter_map(|m| edge_for(&graph.arena, m))
            .collect();

        let best = Search::new(&graph, &self.params).run(&pre_fixed);
        debug!(
            left = %left.node_ref(),
            right = %right.node_ref(),
            fixed = pre_fixed.len(),
            cost = best.total,
            "cost model matched"
        );
        convert(&graph.arena, &best.edges)
    }

    /// Cost of `matchings` as a complete matching of `left` and `right`:
    /// nodes without a matching count as unmatched.
    pub fn cost(
        &self,
        matchings: &Matchings,
        left: &AstNode,
        right: &AstNode,
    ) -> Result<f32, MatchingsError> {
        if matchings.is_empty() {
            return Ok(0.0);
        }
        matchings.validate(left, right, true)?;

        let graph = CostGraph::new(left, right, self.params.clone());
        let arena = &graph.arena;
        let mut edges = Vec::with_capacity(arena.len());
        let mut covered = HashSet::new();

        for m in matchings.iter() {
            let l = arena
                .lookup(m.left())
                .ok_or(MatchingsError::ForeignNode(m.left()))?;
            let r = arena
                .lookup(m.right())
                .ok_or(MatchingsError::ForeignNode(m.right()))?;
            covered.insert(l);
            covered.insert(r);
            edges.push(Edge::new(Some(l), Some(r)));
        }
        for x in arena.left_nodes().filter(|x| !covered.contains(x)) {
            edges.push(Edge::new(Some(x), None));
        }
        for x in arena.right_nodes().filter(|x| !covered.contains(x)) {
            edges.push(Edge::new(None, Some(x)));
        }

        let (_, total) = graph.exact_costs(&edges);
        Ok(total)
    }
}

/// Arena edge for a matching, oriented left to right. `None` if the matching
/// does not pair a left node with a right node.
fn edge_for(arena: &TreeArena<'_>, m: &Matching) -> Option<Edge> {
    let a = arena.lookup(m.left())?;
    let b = arena.lookup(m.right())?;
    match (arena.is_left(a), arena.is_left(b)) {
        (true, false) => Some(Edge::new(Some(a), Some(b))),
        (false, true) => Some(Edge::new(Some(b), Some(a))),
        _ => None,
    }
}

/// Scores every matched edge `(m, n)` by the number of nodes below `m` whose
/// image lies below `n`.
fn convert(arena: &TreeArena<'_>, edges: &[Edge]) -> Matchings {
    let mut image: Vec<Option<Ix>> = vec![None; arena.len()];
    for e in edges {
        if let (Some(m), Some(n)) = (e.m, e.n) {
            image[m] = Some(n);
        }
    }

    edges
        .iter()
        .filter_map(|e| match (e.m, e.n) {
            (Some(m), Some(n)) => {
                let score = (m..arena.end[m])
                    .filter(|&x| image[x].is_some_and(|y| arena.in_subtree(n, y)))
                    .count();
                Some(Matching::new(arena.nodes[m], arena.nodes[n], score, NAME))
            }
            _ => None,
        })
        .collect()
}

impl MatchStrategy for CostModelMatcher {
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
    use crate::types::{Category, Revision};

    fn params() -> CostModelParams {
        CostModelParams {
            parallel: false,
            iterations: 20,
            ..Default::default()
        }
    }

    fn sample() -> (AstNode, AstNode) {
        (
            tagged(
                ordered("A", vec![leaf("x"), ordered("B", vec![leaf("y")]), leaf("z")]),
                Revision::Left,
            ),
            tagged(
                ordered("A", vec![ordered("B", vec![leaf("y")]), leaf("x"), leaf("w")]),
                Revision::Right,
            ),
        )
    }

    fn summary(ms: &Matchings) -> Vec<(String, String, usize)> {
        ms.iter()
            .map(|m| (m.left().to_string(), m.right().to_string(), m.score()))
            .collect()
    }

    #[test]
    fn test_same_seed_same_result() {
        let (l, r) = sample();
        let a = CostModelMatcher::new(params()).unwrap().match_trees(&l, &r);
        let b = CostModelMatcher::new(params()).unwrap().match_trees(&l, &r);
        assert_eq!(summary(&a), summary(&b));
        assert!(a.validate(&l, &r, true).is_ok());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let (l, r) = sample();
        let sequential = CostModelMatcher::new(params()).unwrap().match_trees(&l, &r);
        let parallel = CostModelMatcher::new(CostModelParams {
            parallel: true,
            ..params()
        })
        .unwrap()
        .match_trees(&l, &r);
        assert_eq!(summary(&sequential), summary(&parallel));
    }

    #[test]
    fn test_fixed_matchings_are_kept() {
        let (l, r) = sample();
        let fixed = Matchings::of(Matching::new(&l.children()[0], &r.children()[1], 1, "test"));
        let ms = CostModelMatcher::new(params())
            .unwrap()
            .match_with_fixed(&l, &r, &fixed);
        let kept = ms
            .get(l.children()[0].node_ref(), r.children()[1].node_ref())
            .unwrap();
        assert_eq!(kept.score(), 1);
        assert_eq!(kept.algorithm(), NAME);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let err = CostModelMatcher::new(CostModelParams {
            iterations: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::NoIterations);
    }

    #[test]
    fn test_method_rename_is_cheaper_than_plain_rename() {
        let cost_of = |category: Category| {
            let l = tagged(AstNode::leaf("decl", "foo").with_category(category), Revision::Left);
            let r = tagged(AstNode::leaf("decl", "bar").with_category(category), Revision::Right);
            let ms = Matchings::of(Matching::new(&l, &r, 0, "test"));
            CostModelMatcher::new(params()).unwrap().cost(&ms, &l, &r).unwrap()
        };
        let method = cost_of(Category::Method);
        let plain = cost_of(Category::Node);
        assert!((method - 0.05).abs() < 1e-6);
        assert!((plain - 0.5).abs() < 1e-6);
        assert!(method < plain);
    }

    #[test]
    fn test_cost_counts_unmatched_nodes() {
        let (l, r) = sample();
        let ms = Matchings::of(Matching::new(&l, &r, 1, "test"));
        let cost = CostModelMatcher::new(params()).unwrap().cost(&ms, &l, &r).unwrap();
        // Ten nodes, all but the two roots unmatched.
        assert!((cost - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_cost_rejects_duplicate_nodes() {
        let (l, r) = sample();
        let mut ms = Matchings::new();
        ms.insert(Matching::new(&l.children()[0], &r.children()[1], 1, "test"));
        ms.insert(Matching::new(&l.children()[0], &r.children()[2], 1, "test"));
        let err = CostModelMatcher::new(params()).unwrap().cost(&ms, &l, &r).unwrap_err();
        assert!(matches!(err, MatchingsError::Duplicate(_)));
    }
}

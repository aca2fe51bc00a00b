//! Metropolis-Hastings style search over complete edge sets.
//!
//! A matching is grown from a set of fixed edges by repeatedly bounding the
//! cost of every remaining candidate edge and fixing one of the cheapest
//! ones, picked at random with a geometric bias towards the front. Each
//! iteration keeps a random part of the current matching, completes it again
//! and accepts the proposal with probability `min(1, exp(-beta * delta))`.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::graph::{CostGraph, Edge};
use super::params::CostModelParams;

/// A complete edge set with its per-edge and total cost.
#[derive(Debug, Clone)]
pub(crate) struct Evaluated {
    pub edges: Vec<Edge>,
    pub costs: Vec<f32>,
    pub total: f32,
}

pub(crate) struct Search<'g, 'a> {
    graph: &'g CostGraph<'a>,
    params: &'g CostModelParams,
    rng: StdRng,
}

impl<'g, 'a> Search<'g, 'a> {
    pub fn new(graph: &'g CostGraph<'a>, params: &'g CostModelParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { graph, params, rng }
    }

    /// Runs the configured number of iterations starting from a completion of
    /// `pre_fixed` and returns the cheapest edge set seen.
    pub fn run(&mut self, pre_fixed: &[Edge]) -> Evaluated {
        let initial = self.complete(pre_fixed);
        let mut current = self.evaluate(initial);
        let mut lowest = current.clone();
        debug!(cost = current.total, edges = current.edges.len(), "initial matching");

        for iteration in 0..self.params.iterations {
            let proposal = self.propose(&current, pre_fixed);
            let candidate = self.evaluate(proposal);

            let delta = f64::from(candidate.total) - f64::from(current.total);
            let acceptance = (-f64::from(self.params.beta) * delta).exp().min(1.0);
            let accepted = self.rng.gen_range(0.0..1.0) < acceptance;

            if candidate.total < lowest.total {
                trace!(iteration, cost = candidate.total, "new lowest cost");
                lowest = candidate.clone();
            }
            if accepted {
                current = candidate;
            }
        }

        debug!(cost = lowest.total, "cost model search finished");
        lowest
    }

    pub fn evaluate(&self, edges: Vec<Edge>) -> Evaluated {
        let (costs, total) = self.graph.exact_costs(&edges);
        Evaluated { edges, costs, total }
    }

    /// Every candidate edge between category-compatible nodes, plus a
    /// no-match edge per node, in random order.
    fn candidate_edges(&mut self) -> Vec<Edge> {
        let arena = &self.graph.arena;
        let mut edges = Vec::new();
        for m in arena.left_nodes() {
            edges.push(Edge::new(Some(m), None));
            for n in arena.right_nodes() {
                if arena.nodes[m].category_matches(arena.nodes[n]) {
                    edges.push(Edge::new(Some(m), Some(n)));
                }
            }
        }
        for n in arena.right_nodes() {
            edges.push(Edge::new(None, Some(n)));
        }
        edges.shuffle(&mut self.rng);
        edges
    }

    /// Extends `fixed` to a complete edge set in which every node occurs in
    /// exactly one edge.
    pub fn complete(&mut self, fixed: &[Edge]) -> Vec<Edge> {
        let mut current = self.candidate_edges();
        let mut chosen: Vec<Edge> = Vec::with_capacity(self.graph.arena.len());
        let mut chosen_set = HashSet::new();

        for e in fixed {
            if !current.contains(e) {
                current.push(*e);
            }
        }
        for e in fixed {
            if chosen_set.insert(*e) {
                chosen.push(*e);
                prune(e, &mut current);
            }
        }

        while current.iter().any(|e| !chosen_set.contains(e)) {
            let bounds = self.graph.bounds(&current);
            let mut ranked: Vec<(Edge, (f32, f32))> = current.iter().copied().zip(bounds).collect();
            ranked.sort_by(|(_, a), (_, b)| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
            current = ranked.iter().map(|(e, _)| *e).collect();

            let available: Vec<Edge> = current
                .iter()
                .copied()
                .filter(|e| !chosen_set.contains(e))
                .collect();
            let pick = available[self.sample_index(available.len())];

            chosen_set.insert(pick);
            chosen.push(pick);
            prune(&pick, &mut current);
        }
        chosen
    }

    /// Keeps part of `previous` (besides `pre_fixed`) and completes the rest.
    fn propose(&mut self, previous: &Evaluated, pre_fixed: &[Edge]) -> Vec<Edge> {
        let mut variable: Vec<(Edge, f32)> = previous
            .edges
            .iter()
            .copied()
            .zip(previous.costs.iter().copied())
            .filter(|(e, _)| !pre_fixed.contains(e))
            .collect();
        let len = variable.len();

        let keep = if self.params.fix_random_percentage {
            let lower = (self.params.fix_lower * len as f32) as usize;
            let upper = (self.params.fix_upper * len as f32) as usize;
            variable.shuffle(&mut self.rng);
            let u: f32 = self.rng.gen_range(0.0..1.0);
            lower + (u * (upper - lower + 1) as f32) as usize
        } else {
            variable.sort_by(|a, b| a.1.total_cmp(&b.1));
            if len == 0 { 0 } else { self.rng.gen_range(0..len) }
        };

        let mut fixed: Vec<Edge> = variable
            .into_iter()
            .take(keep.min(len))
            .map(|(e, _)| e)
            .collect();
        trace!(kept = fixed.len(), of = len, "proposing");
        fixed.extend_from_slice(pre_fixed);
        self.complete(&fixed)
    }

    /// Index into a list of `len` ranked edges, drawn from a geometric
    /// distribution with success probability `p_assign` truncated to `len`.
    fn sample_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        let p = f64::from(self.params.p_assign);
        if p >= 1.0 {
            return 0;
        }
        if p <= 0.0 {
            return self.rng.gen_range(0..len);
        }

        let q = 1.0 - p;
        let u: f64 = self.rng.gen_range(0.0..1.0);
        let mass = 1.0 - q.powi(len as i32);
        let k = ((1.0 - u * mass).ln() / q.ln()).floor();
        (k.max(0.0) as usize).min(len - 1)
    }
}

/// Drops every edge of `current` that shares a node with `edge`, except
/// `edge` itself.
fn prune(edge: &Edge, current: &mut Vec<Edge>) {
    current.retain(|c| {
        c == edge
            || !((edge.m.is_some() && edge.m == c.m) || (edge.n.is_some() && edge.n == c.n))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::*;
    use crate::types::Revision;

    fn params() -> CostModelParams {
        CostModelParams {
            parallel: false,
            iterations: 10,
            ..Default::default()
        }
    }

    fn assert_complete(graph: &CostGraph<'_>, edges: &[Edge]) {
        let mut seen = HashSet::new();
        for e in edges {
            for x in [e.m, e.n].into_iter().flatten() {
                assert!(seen.insert(x), "node {x} covered twice");
            }
        }
        assert_eq!(seen.len(), graph.arena.len());
    }

    #[test]
    fn test_prune_keeps_edge_and_unrelated() {
        let mut current = vec![
            Edge::new(Some(0), Some(3)),
            Edge::new(Some(0), None),
            Edge::new(None, Some(3)),
            Edge::new(Some(1), Some(3)),
            Edge::new(Some(1), Some(4)),
        ];
        prune(&Edge::new(Some(0), Some(3)), &mut current);
        assert_eq!(current, vec![Edge::new(Some(0), Some(3)), Edge::new(Some(1), Some(4))]);
    }

    #[test]
    fn test_complete_covers_every_node_once() {
        let l = tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Left);
        let r = tagged(ordered("A", vec![leaf("y"), leaf("z")]), Revision::Right);
        let p = params();
        let graph = CostGraph::new(&l, &r, p.clone());
        let mut search = Search::new(&graph, &p);

        let fixed = [Edge::new(Some(0), Some(3))];
        let edges = search.complete(&fixed);
        assert!(edges.contains(&fixed[0]));
        assert_complete(&graph, &edges);
    }

    #[test]
    fn test_sample_index_stays_in_range() {
        let l = tagged(leaf("x"), Revision::Left);
        let r = tagged(leaf("x"), Revision::Right);
        let p = CostModelParams {
            p_assign: 0.05,
            ..params()
        };
        let graph = CostGraph::new(&l, &r, p.clone());
        let mut search = Search::new(&graph, &p);
        for len in 1..20 {
            assert!(search.sample_index(len) < len);
        }
    }

    #[test]
    fn test_run_finds_identity_on_equal_trees() {
        let l = tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Left);
        let r = tagged(ordered("A", vec![leaf("x"), leaf("y")]), Revision::Right);
        let p = CostModelParams {
            iterations: 30,
            ..params()
        };
        let graph = CostGraph::new(&l, &r, p.clone());
        let best = Search::new(&graph, &p).run(&[]);
        assert_complete(&graph, &best.edges);
        // Leaving every node unmatched costs exactly 1.
        assert!(best.total < 1.0);
    }
}

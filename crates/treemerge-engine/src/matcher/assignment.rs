//! Unordered matching as a maximum-weight bipartite assignment.
//!
//! Every left child is scored against every right child through the
//! dispatcher; the resulting matrix is padded to a square and handed to an
//! [`AssignmentSolver`]. The Hungarian solver lives here, the simplex-based
//! one in [`super::lp`].

use tracing::{trace, warn};

use super::{MatchStrategy, Matcher};
use crate::matching::{Matching, Matchings};
use crate::tree::AstNode;

pub const HUNGARIAN: &str = "hungarian";

/// Solves a square maximum-weight assignment problem.
pub trait AssignmentSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the assigned `(row, column)` cells of a square score matrix,
    /// or `None` if the solver gave up.
    fn solve(&self, scores: &[Vec<usize>]) -> Option<Vec<(usize, usize)>>;
}

/// Pads an `m x n` matrix with zero rows or columns to `max(m, n)` square.
pub(crate) fn pad_square(scores: &[Vec<usize>], m: usize, n: usize) -> Vec<Vec<usize>> {
    let width = m.max(n);
    (0..width)
        .map(|i| {
            (0..width)
                .map(|j| if i < m && j < n { scores[i][j] } else { 0 })
                .collect()
        })
        .collect()
}

/// Kuhn-Munkres over `max - score` costs.
#[derive(Debug, Clone, Copy, Default)]
pub struct HungarianSolver;

impl AssignmentSolver for HungarianSolver {
    fn name(&self) -> &'static str {
        HUNGARIAN
    }

    fn solve(&self, scores: &[Vec<usize>]) -> Option<Vec<(usize, usize)>> {
        let n = scores.len();
        if n == 0 {
            return Some(Vec::new());
        }

        let max_w = scores.iter().flatten().copied().max().unwrap_or(0) as i64;
        let cost: Vec<Vec<i64>> = scores
            .iter()
            .map(|row| row.iter().map(|&w| max_w - w as i64).collect())
            .collect();

        // 1-based potentials; p[j] = row assigned to column j.
        let mut u = vec![0i64; n + 1];
        let mut v = vec![0i64; n + 1];
        let mut p = vec![0usize; n + 1];
        let mut way = vec![0usize; n + 1];

        for i in 1..=n {
            p[0] = i;
            let mut j0 = 0usize;
            let mut minv = vec![i64::MAX; n + 1];
            let mut used = vec![false; n + 1];

            loop {
                used[j0] = true;
                let i0 = p[j0];
                let mut delta = i64::MAX;
                let mut j1 = 0usize;

                for j in 1..=n {
                    if !used[j] {
                        let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                        if cur < minv[j] {
                            minv[j] = cur;
                            way[j] = j0;
                        }
                        if minv[j] < delta {
                            delta = minv[j];
                            j1 = j;
                        }
                    }
                }

                for j in 0..=n {
                    if used[j] {
                        u[p[j]] += delta;
                        v[j] -= delta;
                    } else {
                        minv[j] -= delta;
                    }
                }

                j0 = j1;
                if p[j0] == 0 {
                    break;
                }
            }

            loop {
                let j1 = way[j0];
                p[j0] = p[j1];
                j0 = j1;
                if j0 == 0 {
                    break;
                }
            }
        }

        Some(
            (1..=n)
                .filter(|&j| p[j] > 0)
                .map(|j| (p[j] - 1, j - 1))
                .collect(),
        )
    }
}

/// Matches unordered children by solving an assignment problem with `S`.
#[derive(Debug, Clone, Default)]
pub struct AssignmentMatcher<S> {
    solver: S,
}

impl<S: AssignmentSolver> AssignmentMatcher<S> {
    pub fn new(solver: S) -> Self {
        Self { solver }
    }
}

impl<S: AssignmentSolver> MatchStrategy for AssignmentMatcher<S> {
    fn name(&self) -> &'static str {
        self.solver.name()
    }

    fn match_nodes(
        &self,
        matcher: &mut Matcher,
        left: &AstNode,
        right: &AstNode,
        look_ahead: u32,
    ) -> Matchings {
        let name = self.solver.name();
        let root_match = usize::from(left.matches(right));
        let (lc, rc) = (left.children(), right.children());
        let (m, n) = (lc.len(), rc.len());

        if m == 0 || n == 0 {
            return Matchings::of(Matching::new(left, right, root_match, name));
        }

        let mut scores = vec![vec![0usize; n]; m];
        let mut child_matchings: Vec<Vec<Option<Matchings>>> = Vec::with_capacity(m);
        for (i, l) in lc.iter().enumerate() {
            let mut row = Vec::with_capacity(n);
            for (j, r) in rc.iter().enumerate() {
                let w = matcher.match_pair(l, r, look_ahead);
                scores[i][j] = w.get(l.node_ref(), r.node_ref()).map_or(0, |m| m.score());
                row.push(Some(w));
            }
            child_matchings.push(row);
        }

        let Some(assignment) = self.solver.solve(&pad_square(&scores, m, n)) else {
            warn!(
                solver = name,
                left = %left.node_ref(),
                right = %right.node_ref(),
                "assignment solver did not converge"
            );
            return Matchings::of(Matching::new(left, right, 0, name));
        };

        let mut score = root_match;
        let mut children = Matchings::new();
        for (i, j) in assignment {
            if i >= m || j >= n || scores[i][j] == 0 {
                continue;
            }
            score += scores[i][j];
            if let Some(w) = child_matchings[i][j].take() {
                children.extend(w);
            }
        }
        trace!(solver = name, left = %left.node_ref(), right = %right.node_ref(), score, "assigned children");

        let mut out = Matchings::of(Matching::new(left, right, score, name));
        out.extend(children);
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::matcher::lp::LpSolver;
    use crate::matcher::test_support::*;
    use crate::matcher::MatcherConfig;
    use crate::types::Revision;
    use proptest::prelude::*;

    /// Best achievable total over all permutations of a square matrix.
    pub(crate) fn brute_force(scores: &[Vec<usize>]) -> usize {
        fn go(scores: &[Vec<usize>], row: usize, used: &mut Vec<bool>) -> usize {
            if row == scores.len() {
                return 0;
            }
            let mut best = 0;
            for col in 0..scores.len() {
                if !used[col] {
                    used[col] = true;
                    best = best.max(scores[row][col] + go(scores, row + 1, used));
                    used[col] = false;
                }
            }
            best
        }
        go(scores, 0, &mut vec![false; scores.len()])
    }

    pub(crate) fn checked_total(scores: &[Vec<usize>], pairs: &[(usize, usize)]) -> usize {
        let mut rows = std::collections::HashSet::new();
        let mut cols = std::collections::HashSet::new();
        for &(i, j) in pairs {
            assert!(rows.insert(i), "row {i} assigned twice");
            assert!(cols.insert(j), "column {j} assigned twice");
        }
        pairs.iter().map(|&(i, j)| scores[i][j]).sum()
    }

    fn matrix() -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1usize..=5, 1usize..=5).prop_flat_map(|(m, n)| {
            proptest::collection::vec(proptest::collection::vec(0usize..10, n), m)
                .prop_map(move |rows| pad_square(&rows, m, n))
        })
    }

    #[test]
    fn test_hungarian_simple() {
        let scores = vec![vec![3, 1], vec![1, 3]];
        let mut pairs = HungarianSolver.solve(&scores).unwrap();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_pad_square() {
        let padded = pad_square(&[vec![1, 2, 3]], 1, 3);
        assert_eq!(padded, vec![vec![1, 2, 3], vec![0, 0, 0], vec![0, 0, 0]]);
    }

    #[test]
    fn test_permuted_children_fully_match() {
        let l = tagged(unordered("A", vec![leaf("x"), leaf("y"), leaf("z")]), Revision::Left);
        let r = tagged(unordered("A", vec![leaf("z"), leaf("x"), leaf("y")]), Revision::Right);
        let config = MatcherConfig {
            identical_subtree: false,
            ..Default::default()
        };
        let mut matcher = Matcher::new(&config).unwrap();
        let ms = AssignmentMatcher::new(HungarianSolver).match_nodes(&mut matcher, &l, &r, 0);

        let root = ms.get(l.node_ref(), r.node_ref()).unwrap();
        assert_eq!(root.score(), 4);
        assert!(root.is_full());
        assert_eq!(ms.len(), 4);
        assert_eq!(root.algorithm(), HUNGARIAN);
    }

    #[test]
    fn test_childless_side_scores_root_only() {
        let l = tagged(unordered("A", vec![leaf("x")]), Revision::Left);
        let r = tagged(unordered("A", vec![]), Revision::Right);
        let mut matcher = Matcher::new(&MatcherConfig::default()).unwrap();
        let ms = AssignmentMatcher::new(HungarianSolver).match_nodes(&mut matcher, &l, &r, 0);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.get(l.node_ref(), r.node_ref()).unwrap().score(), 1);
    }

    struct GiveUp;

    impl AssignmentSolver for GiveUp {
        fn name(&self) -> &'static str {
            "give-up"
        }
        fn solve(&self, _scores: &[Vec<usize>]) -> Option<Vec<(usize, usize)>> {
            None
        }
    }

    #[test]
    fn test_solver_failure_yields_zero_root() {
        let l = tagged(unordered("A", vec![leaf("x")]), Revision::Left);
        let r = tagged(unordered("A", vec![leaf("x")]), Revision::Right);
        let mut matcher = Matcher::new(&MatcherConfig::default()).unwrap();
        let ms = AssignmentMatcher::new(GiveUp).match_nodes(&mut matcher, &l, &r, 0);
        assert_eq!(ms.len(), 1);
        assert_eq!(ms.get(l.node_ref(), r.node_ref()).unwrap().score(), 0);
    }

    proptest! {
        #[test]
        fn prop_hungarian_is_optimal(scores in matrix()) {
            let pairs = HungarianSolver.solve(&scores).unwrap();
            prop_assert_eq!(checked_total(&scores, &pairs), brute_force(&scores));
        }

        #[test]
        fn prop_lp_is_optimal(scores in matrix()) {
            let pairs = LpSolver::default().solve(&scores).unwrap();
            prop_assert_eq!(checked_total(&scores, &pairs), brute_force(&scores));
        }
    }
}

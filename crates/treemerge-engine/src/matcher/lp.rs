//! Assignment via linear programming.
//!
//! Maximizes `sum(score_ij * x_ij)` subject to `x_ij >= 0` and row and
//! column sums of at most one. The constraint matrix is totally unimodular,
//! so the simplex vertices are 0/1 assignments. Solved with a dense tableau
//! and Bland's rule.

use tracing::debug;

use super::assignment::AssignmentSolver;

pub const NAME: &str = "lp";

/// Values this close to one count as an assigned cell.
const THRESHOLD: f64 = 1e-6;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct LpSolver {
    /// Pivot limit after which the solver gives up.
    pub max_iterations: usize,
}

impl Default for LpSolver {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
        }
    }
}

struct Tableau {
    rows: Vec<Vec<f64>>,
    basis: Vec<usize>,
    width: usize,
}

impl Tableau {
    /// `2w` constraint rows plus the objective row; columns are the `w * w`
    /// cell variables, one slack per constraint, and the right-hand side.
    fn new(scores: &[Vec<usize>]) -> Self {
        let w = scores.len();
        let vars = w * w;
        let constraints = 2 * w;
        let width = vars + constraints + 1;

        let mut rows = vec![vec![0.0; width]; constraints + 1];
        for i in 0..w {
            for j in 0..w {
                let x = i * w + j;
                rows[i][x] = 1.0;
                rows[w + j][x] = 1.0;
                rows[constraints][x] = -(scores[i][j] as f64);
            }
        }
        for (r, row) in rows.iter_mut().take(constraints).enumerate() {
            row[vars + r] = 1.0;
            row[width - 1] = 1.0;
        }

        Self {
            rows,
            basis: (vars..vars + constraints).collect(),
            width,
        }
    }

    fn rhs(&self, row: usize) -> f64 {
        self.rows[row][self.width - 1]
    }

    fn objective(&self) -> &[f64] {
        &self.rows[self.rows.len() - 1]
    }

    /// Bland's rule: lowest-indexed column with a negative reduced cost.
    fn entering(&self) -> Option<usize> {
        self.objective()[..self.width - 1]
            .iter()
            .position(|&c| c < -EPS)
    }

    /// Minimum ratio test, ties broken by the lowest basic variable.
    fn leaving(&self, col: usize) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for r in 0..self.basis.len() {
            let a = self.rows[r][col];
            if a <= EPS {
                continue;
            }
            let ratio = self.rhs(r) / a;
            best = match best {
                None => Some((r, ratio)),
                Some((b, br)) => {
                    if ratio < br - EPS || ((ratio - br).abs() <= EPS && self.basis[r] < self.basis[b]) {
                        Some((r, ratio))
                    } else {
                        Some((b, br))
                    }
                }
            };
        }
        best.map(|(r, _)| r)
    }

    fn pivot(&mut self, row: usize, col: usize) {
        let p = self.rows[row][col];
        for v in self.rows[row].iter_mut() {
            *v /= p;
        }
        let pivot_row = self.rows[row].clone();
        for (r, other) in self.rows.iter_mut().enumerate() {
            if r == row {
                continue;
            }
            let factor = other[col];
            if factor.abs() <= EPS {
                continue;
            }
            for (v, pv) in other.iter_mut().zip(&pivot_row) {
                *v -= factor * pv;
            }
        }
        self.basis[row] = col;
    }
}

impl AssignmentSolver for LpSolver {
    fn name(&self) -> &'static str {
        NAME
    }

    fn solve(&self, scores: &[Vec<usize>]) -> Option<Vec<(usize, usize)>> {
        let w = scores.len();
        if w == 0 {
            return Some(Vec::new());
        }

        let mut tableau = Tableau::new(scores);
        for iteration in 0..self.max_iterations {
            let Some(col) = tableau.entering() else {
                debug!(iterations = iteration, size = w, "simplex converged");
                let mut pairs: Vec<(usize, usize)> = tableau
                    .basis
                    .iter()
                    .enumerate()
                    .filter(|&(r, &var)| var < w * w && (1.0 - tableau.rhs(r)).abs() < THRESHOLD)
                    .map(|(_, &var)| (var / w, var % w))
                    .collect();
                pairs.sort_unstable();
                return Some(pairs);
            };
            // The feasible region is bounded, so a column without a
            // positive entry cannot be improving.
            let row = tableau.leaving(col)?;
            tableau.pivot(row, col);
        }
        None
    }
}

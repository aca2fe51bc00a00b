//! Simple Tree Matching (Yang, 1991) for ordered children.
//!
//! A longest-common-subsequence style DP over the two child lists, where the
//! weight of a child pair is the score the dispatcher assigns to it.

use super::{MatchStrategy, Matcher};
use crate::matching::{Matching, Matchings};
use crate::tree::AstNode;

pub const NAME: &str = "simple-tree";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Left,
    Top,
    Diag,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTreeMatcher;

impl MatchStrategy for SimpleTreeMatcher {
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
        let root_match = usize::from(left.matches(right));
        let (lc, rc) = (left.children(), right.children());
        let (m, n) = (lc.len(), rc.len());

        let mut score = vec![vec![0usize; n + 1]; m + 1];
        let mut trace: Vec<Vec<Option<(Step, Matchings)>>> =
            (0..=m).map(|_| (0..=n).map(|_| None).collect()).collect();

        for i in 1..=m {
            for j in 1..=n {
                let w = matcher.match_pair(&lc[i - 1], &rc[j - 1], look_ahead);
                let s = w
                    .get(lc[i - 1].node_ref(), rc[j - 1].node_ref())
                    .map_or(0, |m| m.score());

                let diag = score[i - 1][j - 1] + s;
                let (value, step) = if score[i][j - 1] > score[i - 1][j] {
                    if score[i][j - 1] > diag {
                        (score[i][j - 1], Step::Left)
                    } else {
                        (diag, Step::Diag)
                    }
                } else if score[i - 1][j] > diag {
                    (score[i - 1][j], Step::Top)
                } else {
                    (diag, Step::Diag)
                };
                score[i][j] = value;
                trace[i][j] = Some((step, w));
            }
        }

        let mut out = Matchings::of(Matching::new(left, right, score[m][n] + root_match, NAME));
        let (mut i, mut j) = (m, n);
        while i >= 1 && j >= 1 {
            let Some((step, w)) = trace[i][j].take() else {
                break;
            };
            match step {
                Step::Top => i -= 1,
                Step::Left => j -= 1,
                Step::Diag => {
                    if score[i][j] > score[i - 1][j - 1] {
                        out.extend(w);
                    }
                    i -= 1;
                    j -= 1;
                }
            }
        }
        out
    }
}

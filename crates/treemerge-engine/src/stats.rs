//! Merge statistics, updated while operations are applied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::matcher::MatcherStats;
use crate::operations::OperationKind;
use crate::tree::AstNode;
use crate::types::{Category, MergeType};

/// Per-category element counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounters {
    /// Nodes copied into the output from one side only.
    pub added: usize,
    pub deleted: usize,
    /// Nodes present on both sides and merged into one output node.
    pub merged: usize,
    pub conflicting: usize,
    pub choices: usize,
}

impl ElementCounters {
    fn absorb(&mut self, other: &ElementCounters) {
        self.added += other.added;
        self.deleted += other.deleted;
        self.merged += other.merged;
        self.conflicting += other.conflicting;
        self.choices += other.choices;
    }
}

/// Summary of one merged scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub merge_type: MergeType,
    pub left_size: usize,
    pub base_size: usize,
    pub right_size: usize,
    /// Score of the left/right root matching.
    pub root_score: usize,
    pub conflicts: usize,
    /// Element counters of this scenario alone.
    #[serde(default)]
    pub elements: ElementCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStatistics {
    pub per_category: BTreeMap<Category, ElementCounters>,
    pub operations: BTreeMap<OperationKind, usize>,
    pub conflicts: usize,
    pub matcher: MatcherStats,
    pub scenarios: Vec<ScenarioStats>,
    /// Failures of individual scenarios in a batch.
    pub errors: Vec<String>,
}

impl MergeStatistics {
    pub fn element(&mut self, category: Category) -> &mut ElementCounters {
        self.per_category.entry(category).or_default()
    }

    pub fn totals(&self) -> ElementCounters {
        let mut total = ElementCounters::default();
        for counters in self.per_category.values() {
            total.absorb(counters);
        }
        total
    }

    pub(crate) fn record_operation(&mut self, kind: OperationKind) {
        *self.operations.entry(kind).or_default() += 1;
    }

    /// Counts every node of `node`'s subtree as added.
    pub(crate) fn count_added(&mut self, node: &AstNode) {
        for n in node.preorder() {
            self.element(n.category()).added += 1;
        }
    }

    pub(crate) fn count_deleted(&mut self, node: &AstNode) {
        for n in node.preorder() {
            self.element(n.category()).deleted += 1;
        }
    }

    pub(crate) fn count_conflict(&mut self, category: Category) {
        self.conflicts += 1;
        self.element(category).conflicting += 1;
    }

    /// Folds the statistics of another merge into these.
    pub fn absorb(&mut self, other: MergeStatistics) {
        for (category, counters) in &other.per_category {
            self.element(*category).absorb(counters);
        }
        for (kind, count) in other.operations {
            *self.operations.entry(kind).or_default() += count;
        }
        self.conflicts += other.conflicts;

        let m = &mut self.matcher;
        m.calls += other.matcher.calls;
        m.ordered_calls += other.matcher.ordered_calls;
        m.unordered_calls += other.matcher.unordered_calls;
        m.identical_hits += other.matcher.identical_hits;
        m.look_ahead_calls += other.matcher.look_ahead_calls;
        m.cost_model_runs += other.matcher.cost_model_runs;

        self.scenarios.extend(other.scenarios);
        self.errors.extend(other.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_whole_subtree() {
        let node = AstNode::internal(
            "class",
            "Foo",
            Default::default(),
            vec![AstNode::leaf("method", "bar").with_category(Category::Method)],
        )
        .with_category(Category::Class);

        let mut stats = MergeStatistics::default();
        stats.count_added(&node);
        stats.count_deleted(&node.children()[0]);

        assert_eq!(stats.per_category[&Category::Class].added, 1);
        assert_eq!(stats.per_category[&Category::Method].added, 1);
        assert_eq!(stats.per_category[&Category::Method].deleted, 1);
        assert_eq!(stats.totals().added, 2);
    }

    #[test]
    fn test_absorb_sums_counters() {
        let mut a = MergeStatistics::default();
        a.count_conflict(Category::Statement);
        a.record_operation(OperationKind::Conflict);

        let mut b = MergeStatistics::default();
        b.count_conflict(Category::Statement);
        b.record_operation(OperationKind::Conflict);
        b.errors.push("failed".into());

        a.absorb(b);
        assert_eq!(a.conflicts, 2);
        assert_eq!(a.per_category[&Category::Statement].conflicting, 2);
        assert_eq!(a.operations[&OperationKind::Conflict], 2);
        assert_eq!(a.errors, vec!["failed".to_string()]);
    }

    #[test]
    fn test_serializes_category_keys() {
        let mut stats = MergeStatistics::default();
        stats.element(Category::Method).merged = 3;
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["per_category"]["method"]["merged"], 3);
    }
}

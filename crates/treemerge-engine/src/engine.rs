//! Public merge facade.
//!
//! [`MergeEngine`] validates its configuration once and then merges any
//! number of scenarios. Every merge gets its own [`Matcher`] and
//! [`MergeContext`], so nothing carries over from one merge to the next.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, MergeError, ScenarioError};
use crate::matcher::{Matcher, MatcherConfig};
use crate::merge::{merge_scenario, MergeContext};
use crate::operations::OperationRecord;
use crate::parser::parse_to_tree;
use crate::stats::MergeStatistics;
use crate::tree::AstNode;
use crate::types::{Language, MergeScenario, MergeType, Revision};

/// Configuration of the merge engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Turn conflicts into choice nodes guarded by the revision names.
    /// Always on for n-way merges.
    pub conditional_merge: bool,
    pub matcher: MatcherConfig,
}

/// Result of one merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub tree: AstNode,
    pub operations: Vec<OperationRecord>,
    pub statistics: MergeStatistics,
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        self.statistics.conflicts > 0
    }

    pub fn render(&self) -> String {
        self.tree.render()
    }
}

pub struct MergeEngine {
    config: MergeConfig,
}

impl MergeEngine {
    /// Rejects unknown strategy names and invalid cost-model parameters.
    pub fn new(config: MergeConfig) -> Result<Self, ConfigError> {
        config.matcher.cost_model.validate()?;
        Matcher::new(&config.matcher)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    fn matcher(&self) -> Result<Matcher, MergeError> {
        Ok(Matcher::new(&self.config.matcher)?)
    }

    /// Merges a two- or three-way scenario.
    pub fn merge(&self, scenario: &MergeScenario) -> Result<MergeOutcome, MergeError> {
        info!(
            merge_type = %scenario.merge_type,
            left = scenario.left.tree_size(),
            right = scenario.right.tree_size(),
            "merging"
        );
        let mut matcher = self.matcher()?;
        let mut ctx = MergeContext::new(self.config.conditional_merge);
        let conditions = (scenario.left.revision().name(), scenario.right.revision().name());

        let (tree, scenario_stats) = merge_scenario(&mut matcher, scenario, &mut ctx, conditions)?;
        let (operations, mut statistics) = ctx.into_parts();
        statistics.matcher = matcher.stats().clone();
        statistics.scenarios.push(scenario_stats);

        info!(
            operations = operations.len(),
            conflicts = statistics.conflicts,
            "merge finished"
        );
        Ok(MergeOutcome {
            tree,
            operations,
            statistics,
        })
    }

    /// Merges `inputs` left to right into one tree with choice nodes. Each
    /// input is a variant named `A`, `B`, ... in input order; nodes common
    /// to several variants are guarded by the joined names (`A || B`).
    ///
    /// Every step copies the whole intermediate tree again, so the element
    /// counters of the outcome are those of the last step, which built the
    /// final tree. Each step's own counters are kept in its `ScenarioStats`.
    pub fn merge_nway(&self, inputs: Vec<AstNode>) -> Result<MergeOutcome, MergeError> {
        if inputs.len() < 2 {
            return Err(ScenarioError::Cardinality {
                expected: "n-way",
                needed: "at least 2",
                actual: inputs.len(),
            }
            .into());
        }
        info!(inputs = inputs.len(), "merging n-way");

        let mut ctx = MergeContext::new(true);
        let mut statistics = MergeStatistics::default();
        let mut last_step = MergeStatistics::default();
        let mut inputs = inputs.into_iter();
        let mut merged = inputs.next().unwrap_or_else(|| AstNode::empty(Revision::Target));
        let mut names = vec![Revision::Variant(0).name()];

        for (i, next) in inputs.enumerate() {
            let variant = Revision::Variant(i as u32 + 1).name();
            let scenario = MergeScenario::two_way(merged, next);
            let conditions = (names.join(" || "), variant.clone());
            debug!(left = %conditions.0, right = %conditions.1, "n-way step");

            let mut matcher = self.matcher()?;
            let (tree, mut scenario_stats) =
                merge_scenario(&mut matcher, &scenario, &mut ctx, conditions)?;
            scenario_stats.merge_type = MergeType::NWay;
            statistics.scenarios.push(scenario_stats);
            last_step = ctx.take_statistics();

            statistics.absorb(MergeStatistics {
                matcher: matcher.stats().clone(),
                ..Default::default()
            });

            names.push(variant);
            merged = tree;
        }

        let (operations, _) = ctx.into_parts();
        statistics.absorb(last_step);
        info!(
            variants = names.len(),
            operations = operations.len(),
            "n-way merge finished"
        );
        Ok(MergeOutcome {
            tree: merged,
            operations,
            statistics,
        })
    }

    /// Merges independent scenarios, one result per scenario.
    pub fn merge_batch(&self, scenarios: &[MergeScenario]) -> Vec<Result<MergeOutcome, MergeError>> {
        scenarios.par_iter().map(|s| self.merge(s)).collect()
    }

    /// Parses the sources and merges them. Without `base` the merge is
    /// two-way.
    pub fn merge_sources(
        &self,
        left: &str,
        base: Option<&str>,
        right: &str,
        language: Language,
    ) -> Result<MergeOutcome, MergeError> {
        let left = parse_to_tree(left, language)?;
        let right = parse_to_tree(right, language)?;
        let scenario = match base {
            Some(base) => MergeScenario::three_way(left, parse_to_tree(base, language)?, right),
            None => MergeScenario::two_way(left, right),
        };
        self.merge(&scenario)
    }
}

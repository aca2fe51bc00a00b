//! Tree matching: the recursive dispatcher and its pluggable strategies.
//!
//! The dispatcher is invoked on a root pair and recurses depth-first, handing
//! each node pair to a strategy picked from the configuration:
//! - **Ordered** children (statements, arguments): Simple Tree Matching
//!   ([`simple_tree`]), or the MCE subtree matcher ([`mce`]) for fully
//!   ordered subtrees when configured.
//! - **Unordered** children (imports, class members): maximum-weight
//!   bipartite assignment ([`assignment`]), solved with the Hungarian
//!   algorithm or a simplex LP ([`lp`]).
//!
//! An identical-subtree pre-pass ([`identical`]) short-circuits unchanged
//! regions, and the cost-model matcher ([`crate::cost_model`]) can replace or
//! refine the top-down result.
//!
//! Strategies recurse through [`Matcher::match_pair`], which also implements
//! the look-ahead past mismatching roots.

pub mod assignment;
pub mod equality;
pub mod identical;
pub mod lp;
pub mod mce;
pub mod simple_tree;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::cost_model::{CostModelMatcher, CostModelParams};
use crate::error::ConfigError;
use crate::matching::{Matching, Matchings};
use crate::tree::AstNode;
use crate::types::{Category, ListOrdering};

use assignment::{AssignmentMatcher, HungarianSolver};
use equality::EqualityMatcher;
use identical::IdenticalSubtreeMatcher;
use lp::LpSolver;
use mce::MceSubtreeMatcher;
use simple_tree::SimpleTreeMatcher;

/// Budget value meaning "look through the whole subtree".
pub const LOOKAHEAD_FULL: u32 = u32::MAX;
/// Budget value meaning "stop at the first mismatching pair".
pub const LOOKAHEAD_OFF: u32 = 0;

const DISPATCHER: &str = "dispatcher";

/// How far matching continues below a pair whose roots do not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookAhead {
    #[default]
    Off,
    Full,
    Levels(u32),
}

impl LookAhead {
    pub fn budget(self) -> u32 {
        match self {
            LookAhead::Off => LOOKAHEAD_OFF,
            LookAhead::Full => LOOKAHEAD_FULL,
            LookAhead::Levels(n) => n,
        }
    }
}

/// How the cost-model matcher takes part in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostModelMode {
    /// Not used.
    #[default]
    Off,
    /// Produces the whole matching on its own.
    Replacement,
    /// Keeps the top-down matching fixed and matches whatever it left over.
    PostProcessor,
    /// Re-matches pairs whose top-down percentage falls below
    /// `re_match_bound`, keeping the better result.
    Integrated,
}

/// Matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Look-ahead budget applied below matching roots.
    #[serde(default)]
    pub look_ahead: LookAhead,
    /// Per-category look-ahead that takes precedence over `look_ahead`.
    #[serde(default)]
    pub look_ahead_overrides: HashMap<Category, LookAhead>,
    /// Strategy for pairs with ordered children.
    #[serde(default = "default_ordered_strategy")]
    pub ordered_strategy: String,
    /// Strategy for pairs with unordered children.
    #[serde(default = "default_unordered_strategy")]
    pub unordered_strategy: String,
    /// Optional strategy for pairs whose subtrees are ordered throughout.
    #[serde(default)]
    pub fully_ordered_strategy: Option<String>,
    /// Run the identical-subtree pre-pass.
    #[serde(default = "default_true")]
    pub identical_subtree: bool,
    /// Evaluate MCE child pairs on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub cost_model_mode: CostModelMode,
    #[serde(default)]
    pub cost_model: CostModelParams,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            look_ahead: LookAhead::Off,
            look_ahead_overrides: HashMap::new(),
            ordered_strategy: default_ordered_strategy(),
            unordered_strategy: default_unordered_strategy(),
            fully_ordered_strategy: None,
            identical_subtree: true,
            parallel: true,
            cost_model_mode: CostModelMode::Off,
            cost_model: CostModelParams::default(),
        }
    }
}

fn default_ordered_strategy() -> String {
    simple_tree::NAME.into()
}
fn default_unordered_strategy() -> String {
    assignment::HUNGARIAN.into()
}
fn default_true() -> bool {
    true
}

impl MatcherConfig {
    fn look_ahead_enabled(&self) -> bool {
        self.look_ahead != LookAhead::Off || !self.look_ahead_overrides.is_empty()
    }

    /// Budget for a pair of matching roots of the given category.
    pub fn look_ahead_for(&self, category: Category) -> u32 {
        self.look_ahead_overrides
            .get(&category)
            .copied()
            .unwrap_or(self.look_ahead)
            .budget()
    }
}

/// A matching algorithm the dispatcher can delegate a node pair to.
///
/// Implementations compute the matchings for `left`/`right` and their
/// subtrees, recursing into child pairs through `matcher` when they need the
/// dispatcher's strategy selection for them.
pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn match_nodes(
        &self,
        matcher: &mut Matcher,
        left: &AstNode,
        right: &AstNode,
        look_ahead: u32,
    ) -> Matchings;
}

/// Strategies keyed by name.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<&'static str, Arc<dyn MatchStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in strategy, parameterized by `config`.
    pub fn from_config(config: &MatcherConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.register(Arc::new(EqualityMatcher));
        registry.register(Arc::new(SimpleTreeMatcher));
        registry.register(Arc::new(MceSubtreeMatcher::new(config.parallel)));
        registry.register(Arc::new(AssignmentMatcher::new(HungarianSolver)));
        registry.register(Arc::new(AssignmentMatcher::new(LpSolver::default())));
        registry.register(Arc::new(CostModelMatcher::new(config.cost_model.clone())?));
        Ok(registry)
    }

    pub fn register(&mut self, strategy: Arc<dyn MatchStrategy>) {
        self.strategies.insert(strategy.name(), strategy);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn MatchStrategy>, ConfigError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownStrategy(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.strategies.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Call counters, logged after each top-level match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherStats {
    pub calls: usize,
    pub ordered_calls: usize,
    pub unordered_calls: usize,
    pub identical_hits: usize,
    pub look_ahead_calls: usize,
    pub cost_model_runs: usize,
}

/// The recursive matcher dispatcher.
pub struct Matcher {
    config: MatcherConfig,
    ordered: Arc<dyn MatchStrategy>,
    unordered: Arc<dyn MatchStrategy>,
    fully_ordered: Option<Arc<dyn MatchStrategy>>,
    cost_model: Option<CostModelMatcher>,
    identical: IdenticalSubtreeMatcher,
    stats: MatcherStats,
}

impl Matcher {
    pub fn new(config: &MatcherConfig) -> Result<Self, ConfigError> {
        let registry = StrategyRegistry::from_config(config)?;
        Self::with_registry(config, &registry)
    }

    /// Resolves the configured strategy names against `registry`. Unknown
    /// names are rejected here, before anything is matched.
    pub fn with_registry(
        config: &MatcherConfig,
        registry: &StrategyRegistry,
    ) -> Result<Self, ConfigError> {
        let fully_ordered = match &config.fully_ordered_strategy {
            Some(name) => Some(registry.get(name)?),
            None => None,
        };
        let cost_model = match config.cost_model_mode {
            CostModelMode::Off => None,
            _ => Some(CostModelMatcher::new(config.cost_model.clone())?),
        };
        Ok(Self {
            ordered: registry.get(&config.ordered_strategy)?,
            unordered: registry.get(&config.unordered_strategy)?,
            fully_ordered,
            cost_model,
            identical: IdenticalSubtreeMatcher::new(),
            stats: MatcherStats::default(),
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> &MatcherStats {
        &self.stats
    }

    /// Matches two whole trees. Runs the identical-subtree pre-pass and the
    /// cost model according to the configuration.
    pub fn match_trees(&mut self, left: &AstNode, right: &AstNode) -> Matchings {
        let mode = self.config.cost_model_mode;

        if mode == CostModelMode::Replacement {
            if let Some(cm) = &self.cost_model {
                self.stats.cost_model_runs += 1;
                let mut ms = cm.match_trees(left, right);
                ms.insert(Matching::new(left, right, 0, DISPATCHER));
                return ms;
            }
        }

        if self.config.identical_subtree {
            self.identical.precompute(left, right);
        } else {
            self.identical.clear();
        }

        let budget = self.config.look_ahead_for(left.category());
        let ms = self.match_pair(left, right, budget);

        let ms = match (&self.cost_model, mode) {
            (Some(cm), CostModelMode::PostProcessor) => {
                self.stats.cost_model_runs += 1;
                cm.match_with_fixed(left, right, &ms)
            }
            _ => ms,
        };

        debug!(
            left = %left.node_ref(),
            right = %right.node_ref(),
            matchings = ms.len(),
            calls = self.stats.calls,
            ordered = self.stats.ordered_calls,
            unordered = self.stats.unordered_calls,
            identical = self.stats.identical_hits,
            "matched trees"
        );
        ms
    }

    /// Matches one node pair and, recursively, their subtrees.
    pub fn match_pair(&mut self, left: &AstNode, right: &AstNode, look_ahead: u32) -> Matchings {
        self.stats.calls += 1;

        if left.is_choice() || right.is_choice() {
            return self.match_choice(left, right, look_ahead);
        }

        if self.identical.has_matched(left, right) {
            self.stats.identical_hits += 1;
            return self.identical.match_nodes(left, right);
        }

        let roots_match = left.matches(right);
        let mut budget = look_ahead;
        if !roots_match {
            if budget == LOOKAHEAD_OFF {
                return Matchings::of(Matching::new(left, right, 0, DISPATCHER));
            }
            if budget != LOOKAHEAD_FULL {
                budget -= 1;
            }
            self.stats.look_ahead_calls += 1;
        } else if self.config.look_ahead_enabled() {
            budget = self.config.look_ahead_for(left.category());
        }

        let strategy = self.select(left, right);
        trace!(
            strategy = strategy.name(),
            left = %left.node_ref(),
            right = %right.node_ref(),
            budget,
            "dispatch"
        );
        let ms = strategy.match_nodes(self, left, right, budget);

        if !roots_match {
            let origin = (left.node_ref(), right.node_ref());
            return ms
                .into_iter()
                .map(|m| {
                    if (m.left(), m.right()) == origin {
                        m
                    } else {
                        m.with_origin(origin)
                    }
                })
                .collect();
        }

        if self.config.cost_model_mode == CostModelMode::Integrated {
            return self.rematch_if_weak(left, right, ms);
        }
        ms
    }

    fn select(&mut self, left: &AstNode, right: &AstNode) -> Arc<dyn MatchStrategy> {
        if let Some(strategy) = &self.fully_ordered {
            if fully_ordered(left) && fully_ordered(right) {
                self.stats.ordered_calls += 1;
                return Arc::clone(strategy);
            }
        }
        if left.has_ordered_children() || right.has_ordered_children() {
            self.stats.ordered_calls += 1;
            Arc::clone(&self.ordered)
        } else {
            self.stats.unordered_calls += 1;
            Arc::clone(&self.unordered)
        }
    }

    /// Matches every variant of a choice node against the other side and
    /// attributes the best variant's root matching to the choice node.
    fn match_choice(&mut self, left: &AstNode, right: &AstNode, look_ahead: u32) -> Matchings {
        let choice_is_left = left.is_choice();
        let (choice, other) = if choice_is_left { (left, right) } else { (right, left) };

        let mut best: Option<(usize, &AstNode, Matchings)> = None;
        for variant in choice.variants() {
            let ms = if choice_is_left {
                self.match_pair(&variant.node, other, look_ahead)
            } else {
                self.match_pair(other, &variant.node, look_ahead)
            };
            let score = ms
                .get(variant.node.node_ref(), other.node_ref())
                .map_or(0, |m| m.score());
            if best.as_ref().is_none_or(|(s, _, _)| score > *s) {
                best = Some((score, &variant.node, ms));
            }
        }

        match best {
            Some((_, variant, mut ms)) => {
                if let Some(mut root) = ms.remove(variant.node_ref(), other.node_ref()) {
                    root.substitute(variant.node_ref(), choice);
                    ms.insert(root);
                }
                ms
            }
            None => Matchings::of(Matching::new(left, right, 0, DISPATCHER)),
        }
    }

    fn rematch_if_weak(&mut self, left: &AstNode, right: &AstNode, ms: Matchings) -> Matchings {
        let Some(cm) = &self.cost_model else {
            return ms;
        };
        let Some(root) = ms.get(left.node_ref(), right.node_ref()) else {
            return ms;
        };
        if root.percentage() >= cm.params().re_match_bound {
            return ms;
        }

        self.stats.cost_model_runs += 1;
        let rematched = cm.match_trees(left, right);
        let better = rematched
            .get(left.node_ref(), right.node_ref())
            .is_some_and(|m| m.score() > root.score());
        if better {
            debug!(left = %left.node_ref(), right = %right.node_ref(), "cost model improved weak matching");
            rematched
        } else {
            ms
        }
    }
}

/// Whether every node with children in this subtree has ordered children.
/// Subtrees holding conflicts or choices never qualify.
fn fully_ordered(node: &AstNode) -> bool {
    node.preorder().iter().all(|n| {
        !n.is_conflict()
            && !n.is_choice()
            && (n.children().is_empty() || n.ordering() == ListOrdering::Ordered)
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use proptest::prelude::*;

    use crate::tree::AstNode;
    use crate::types::{ListOrdering, Revision};

    /// Small random trees over a tiny alphabet, so that random pairs share
    /// labels often. Inner nodes are ordered or unordered at random.
    pub fn arb_tree() -> impl Strategy<Value = AstNode> {
        let leaf = "[a-c]".prop_map(|l| AstNode::leaf("id", l));
        leaf.prop_recursive(4, 32, 4, |inner| {
            (
                "[a-b]",
                any::<bool>(),
                proptest::collection::vec(inner, 0..4),
            )
                .prop_map(|(kind, is_ordered, children)| {
                    let ordering = if is_ordered {
                        ListOrdering::Ordered
                    } else {
                        ListOrdering::Unordered
                    };
                    AstNode::internal(kind, "", ordering, children)
                })
        })
    }

    pub fn leaf(label: &str) -> AstNode {
        AstNode::leaf("id", label)
    }

    pub fn ordered(kind: &str, children: Vec<AstNode>) -> AstNode {
        AstNode::internal(kind, "", ListOrdering::Ordered, children)
    }

    pub fn unordered(kind: &str, children: Vec<AstNode>) -> AstNode {
        AstNode::internal(kind, "", ListOrdering::Unordered, children)
    }

    pub fn tagged(mut node: AstNode, revision: Revision) -> AstNode {
        node.renumber(revision);
        node
    }
}

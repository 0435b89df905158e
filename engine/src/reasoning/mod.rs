//! Reasoning stage
//!
//! Produces candidate plans for a context and selects one. The direct path
//! generates `candidate_count` plans concurrently and picks the best by
//! [`scoring::select`]. Deep or ambiguous tasks go through
//! [`tree::TreeExplorer`] instead.
//!
//! Low confidence never aborts the task: when every candidate is below the
//! minimum confidence the best one is still selected and the result is
//! flagged. Only a complete failure to produce any plan is an error.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use weave_sdk::types::{Context, Plan};

use crate::config::{ReasoningConfig, TreeConfig, TreeMode};
use crate::llm::LlmClient;

pub mod planner;
pub mod scoring;
pub mod strategies;
pub mod tree;

pub use planner::{CandidateError, PlanGenerator};
pub use scoring::{PlanScorer, ScoreBreakdown, ScoredPlan};
pub use strategies::NodeStrategy;
pub use tree::{Exploration, TreeExplorer, TreeStats};

/// Task metadata flag requesting tree exploration
pub const DEEP_FLAG: &str = "deep";

#[derive(Debug, Clone, Error)]
pub enum ReasoningError {
    #[error("No candidate plans could be generated ({} attempts failed)", failures.len())]
    NoPlans { failures: Vec<String> },
}

/// Score of one candidate, in generation order
#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub plan_id: String,
    pub reasoning_path: String,
    pub score: ScoreBreakdown,
    /// Strategy score; equals `score.total` on the direct path
    pub ranked_by: f64,
    pub eligible: bool,
}

#[derive(Debug, Clone)]
pub struct ReasoningResult {
    pub selected: Plan,
    /// Every other generated plan, in generation order
    pub alternatives: Vec<Plan>,
    pub reasoning_path: String,
    pub confidence: f64,
    /// Set when no candidate reached the minimum confidence
    pub low_confidence: bool,
    pub candidates: Vec<CandidateScore>,
    pub tree_stats: Option<TreeStats>,
}

pub struct ReasoningSystem {
    generator: Arc<PlanGenerator>,
    scorer: PlanScorer,
    config: ReasoningConfig,
    tree: TreeConfig,
}

impl ReasoningSystem {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        config: ReasoningConfig,
        tree: TreeConfig,
        temperature: f64,
    ) -> Self {
        Self {
            generator: Arc::new(PlanGenerator::new(llm, temperature)),
            scorer: PlanScorer::new(config.weights, config.max_effort),
            config,
            tree,
        }
    }

    /// Whether `context` should be explored as a tree
    pub fn use_tree(&self, context: &Context) -> bool {
        match self.tree.mode {
            TreeMode::Always => true,
            TreeMode::Never => false,
            TreeMode::Auto => {
                context.task.flag(DEEP_FLAG)
                    || context.confidence < self.tree.auto_below_confidence
            }
        }
    }

    pub async fn reason(&self, context: &Context) -> Result<ReasoningResult, ReasoningError> {
        let result = if self.use_tree(context) {
            self.reason_tree(context).await?
        } else {
            self.reason_direct(context).await?
        };

        if result.low_confidence {
            warn!(
                task_id = %context.task.id,
                confidence = result.confidence,
                "All candidate plans below minimum confidence; proceeding with best"
            );
        }
        info!(
            task_id = %context.task.id,
            path = %result.reasoning_path,
            confidence = result.confidence,
            alternatives = result.alternatives.len(),
            "Selected plan"
        );
        Ok(result)
    }

    async fn reason_direct(&self, context: &Context) -> Result<ReasoningResult, ReasoningError> {
        let k = self.config.candidate_count.max(1);
        let generations = (0..k).map(|i| {
            let seed = self.config.seed.map(|s| s.wrapping_add(i as u64));
            let path = format!("direct/{}", i);
            async move {
                self.generator
                    .generate(context, i, k, seed, &path)
                    .await
                    .map_err(|e| format!("{}: {}", path, e))
            }
        });

        let mut candidates = Vec::with_capacity(k);
        let mut failures = Vec::new();
        for (order, result) in join_all(generations).await.into_iter().enumerate() {
            match result {
                Ok(plan) => {
                    let score = self.scorer.score(&plan, context);
                    candidates.push(ScoredPlan { plan, score, order });
                }
                Err(e) => {
                    warn!("Candidate plan failed: {}", e);
                    failures.push(e);
                }
            }
        }

        let Some((best, low_confidence)) = scoring::select(&candidates, self.config.min_confidence)
        else {
            return Err(ReasoningError::NoPlans { failures });
        };

        let scores = candidates
            .iter()
            .map(|c| CandidateScore {
                plan_id: c.plan.id.clone(),
                reasoning_path: c.plan.reasoning_path.clone(),
                score: c.score,
                ranked_by: c.score.total,
                eligible: c.plan.confidence >= self.config.min_confidence,
            })
            .collect();

        let total = candidates[best].score.total;
        let mut alternatives = Vec::with_capacity(candidates.len().saturating_sub(1));
        let mut selected = None;
        for (i, c) in candidates.into_iter().enumerate() {
            if i == best {
                selected = Some(c.plan);
            } else {
                alternatives.push(c.plan);
            }
        }
        let Some(selected) = selected else {
            return Err(ReasoningError::NoPlans { failures });
        };

        Ok(ReasoningResult {
            reasoning_path: selected.reasoning_path.clone(),
            confidence: overall_confidence(total, &selected, low_confidence),
            selected,
            alternatives,
            low_confidence,
            candidates: scores,
            tree_stats: None,
        })
    }

    async fn reason_tree(&self, context: &Context) -> Result<ReasoningResult, ReasoningError> {
        let strategy = strategies::from_config(&self.tree, Arc::clone(self.generator.llm()));
        let explorer = TreeExplorer::new(
            Arc::clone(&self.generator),
            self.scorer.clone(),
            strategy,
            self.tree.clone(),
            self.config.seed,
        );
        let exploration = explorer.explore(context).await?;

        let best = exploration.best;
        let best_node = &exploration.nodes[best];
        let low_confidence =
            !best_node.viable || best_node.plan.confidence < self.config.min_confidence;
        let confidence = overall_confidence(best_node.score, &best_node.plan, low_confidence);

        let candidates = exploration
            .nodes
            .iter()
            .map(|n| CandidateScore {
                plan_id: n.plan.id.clone(),
                reasoning_path: n.plan.reasoning_path.clone(),
                score: n.heuristic,
                ranked_by: n.score,
                eligible: n.viable,
            })
            .collect();

        let stats = exploration.stats;
        let mut alternatives = Vec::with_capacity(exploration.nodes.len().saturating_sub(1));
        let mut selected = None;
        for (i, node) in exploration.nodes.into_iter().enumerate() {
            if i == best {
                selected = Some(node.plan);
            } else {
                alternatives.push(node.plan);
            }
        }
        let Some(selected) = selected else {
            return Err(ReasoningError::NoPlans {
                failures: Vec::new(),
            });
        };

        Ok(ReasoningResult {
            reasoning_path: selected.reasoning_path.clone(),
            selected,
            alternatives,
            confidence,
            low_confidence,
            candidates,
            tree_stats: Some(stats),
        })
    }
}

/// Reported confidence: the selection score, capped by the plan's own
/// confidence when the choice is flagged low
fn overall_confidence(score: f64, plan: &Plan, low_confidence: bool) -> f64 {
    let score = score.clamp(0.0, 1.0);
    if low_confidence {
        score.min(plan.confidence)
    } else {
        score
    }
}

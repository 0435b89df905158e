//! Node scoring strategies for tree exploration
//!
//! A strategy scores one sibling group at a time (the children of a single
//! parent), so comparison-based strategies can rank siblings against each
//! other. Every strategy returns one score in `[0, 1]` per node.
//!
//! LLM-backed strategies never fail: an unusable judgment falls back to the
//! node's heuristic score.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};
use weave_sdk::types::{Context, Plan};

use crate::config::{StrategyKind, TreeConfig};
use crate::llm::{extract_json, CompletionOptions, LlmClient, Purpose};

/// One node as seen by a strategy
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub plan: &'a Plan,
    /// Heuristic plan score from the scorer
    pub heuristic: f64,
    pub depth: usize,
    /// Per-node seed derived from its tree position
    pub seed: Option<u64>,
}

#[async_trait]
pub trait NodeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score each sibling, in order
    async fn score(&self, context: &Context, siblings: &[NodeView<'_>]) -> Vec<f64>;
}

/// Heuristic score minus a per-level depth penalty
pub struct ValueStrategy {
    depth_penalty: f64,
}

impl ValueStrategy {
    pub fn new(depth_penalty: f64) -> Self {
        Self {
            depth_penalty: depth_penalty.max(0.0),
        }
    }

    fn value(&self, node: &NodeView<'_>) -> f64 {
        let levels = node.depth.saturating_sub(1) as f64;
        (node.heuristic - self.depth_penalty * levels).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl NodeStrategy for ValueStrategy {
    fn name(&self) -> &'static str {
        "value"
    }

    async fn score(&self, _context: &Context, siblings: &[NodeView<'_>]) -> Vec<f64> {
        siblings.iter().map(|n| self.value(n)).collect()
    }
}

/// Mean of `samples` independent LLM judgments per node
pub struct VoteStrategy {
    llm: Arc<dyn LlmClient>,
    samples: usize,
}

impl VoteStrategy {
    pub fn new(llm: Arc<dyn LlmClient>, samples: usize) -> Self {
        Self {
            llm,
            samples: samples.max(1),
        }
    }

    async fn vote(&self, context: &Context, node: &NodeView<'_>) -> f64 {
        let prompt = vote_prompt(context, node.plan);
        let judgments = (0..self.samples).map(|i| {
            let options = CompletionOptions::new(Purpose::Vote)
                .with_seed(node.seed.map(|s| s.wrapping_add(i as u64)));
            let prompt = prompt.as_str();
            async move { self.llm.complete(prompt, &options).await }
        });

        let votes: Vec<f64> = join_all(judgments)
            .await
            .into_iter()
            .filter_map(|r| match r {
                Ok(text) => parse_vote(&text),
                Err(e) => {
                    debug!("Vote failed: {}", e);
                    None
                }
            })
            .collect();

        if votes.is_empty() {
            warn!(path = %node.plan.reasoning_path, "No usable votes; using heuristic score");
            return node.heuristic;
        }
        votes.iter().sum::<f64>() / votes.len() as f64
    }
}

#[async_trait]
impl NodeStrategy for VoteStrategy {
    fn name(&self) -> &'static str {
        "vote"
    }

    async fn score(&self, context: &Context, siblings: &[NodeView<'_>]) -> Vec<f64> {
        join_all(siblings.iter().map(|n| self.vote(context, n))).await
    }
}

/// Pairwise win rate among siblings
///
/// Every pair is judged once; ties and unusable judgments award half a win
/// to each side unless the heuristic scores differ, in which case the
/// heuristic decides. A lone sibling keeps its heuristic score.
pub struct ComparisonStrategy {
    llm: Arc<dyn LlmClient>,
}

impl ComparisonStrategy {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl NodeStrategy for ComparisonStrategy {
    fn name(&self) -> &'static str {
        "comparison"
    }

    async fn score(&self, context: &Context, siblings: &[NodeView<'_>]) -> Vec<f64> {
        let n = siblings.len();
        if n < 2 {
            return siblings.iter().map(|s| s.heuristic).collect();
        }

        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();
        let judgments = pairs.iter().map(|&(i, j)| {
            let prompt = comparison_prompt(context, siblings[i].plan, siblings[j].plan);
            let options = CompletionOptions::new(Purpose::Comparison)
                .with_temperature(0.0)
                .with_seed(siblings[i].seed);
            async move { self.llm.complete(&prompt, &options).await }
        });
        let results = join_all(judgments).await;

        let mut wins = vec![0.0; n];
        for (&(i, j), result) in pairs.iter().zip(results) {
            let winner = result.ok().and_then(|text| parse_winner(&text));
            match winner {
                Some(Winner::A) => wins[i] += 1.0,
                Some(Winner::B) => wins[j] += 1.0,
                None => {
                    let (hi, hj) = (siblings[i].heuristic, siblings[j].heuristic);
                    if hi > hj {
                        wins[i] += 1.0;
                    } else if hj > hi {
                        wins[j] += 1.0;
                    } else {
                        wins[i] += 0.5;
                        wins[j] += 0.5;
                    }
                }
            }
        }

        let games = (n - 1) as f64;
        wins.into_iter().map(|w| w / games).collect()
    }
}

/// Weighted blend of other strategies
pub struct EnsembleStrategy {
    members: Vec<(f64, Box<dyn NodeStrategy>)>,
}

impl EnsembleStrategy {
    pub fn new(members: Vec<(f64, Box<dyn NodeStrategy>)>) -> Self {
        let members = members
            .into_iter()
            .filter(|(w, _)| *w > 0.0 && w.is_finite())
            .collect();
        Self { members }
    }
}

#[async_trait]
impl NodeStrategy for EnsembleStrategy {
    fn name(&self) -> &'static str {
        "ensemble"
    }

    async fn score(&self, context: &Context, siblings: &[NodeView<'_>]) -> Vec<f64> {
        let total: f64 = self.members.iter().map(|(w, _)| w).sum();
        if total <= 0.0 {
            return siblings.iter().map(|s| s.heuristic).collect();
        }

        let member_scores =
            join_all(self.members.iter().map(|(_, s)| s.score(context, siblings))).await;

        let mut blended = vec![0.0; siblings.len()];
        for ((weight, _), scores) in self.members.iter().zip(member_scores) {
            for (b, s) in blended.iter_mut().zip(scores) {
                *b += weight / total * s;
            }
        }
        blended.into_iter().map(|b| b.clamp(0.0, 1.0)).collect()
    }
}

/// Build the configured strategy
pub fn from_config(config: &TreeConfig, llm: Arc<dyn LlmClient>) -> Box<dyn NodeStrategy> {
    match config.strategy {
        StrategyKind::Value => Box::new(ValueStrategy::new(config.depth_penalty)),
        StrategyKind::Vote => Box::new(VoteStrategy::new(llm, config.vote_samples)),
        StrategyKind::Comparison => Box::new(ComparisonStrategy::new(llm)),
        StrategyKind::Ensemble => Box::new(EnsembleStrategy::new(vec![
            (
                config.ensemble.value,
                Box::new(ValueStrategy::new(config.depth_penalty)) as Box<dyn NodeStrategy>,
            ),
            (
                config.ensemble.vote,
                Box::new(VoteStrategy::new(Arc::clone(&llm), config.vote_samples)) as Box<dyn NodeStrategy>,
            ),
            (
                config.ensemble.comparison,
                Box::new(ComparisonStrategy::new(llm)) as Box<dyn NodeStrategy>,
            ),
        ])),
    }
}

fn plan_summary(plan: &Plan) -> String {
    plan.steps
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.description))
        .collect::<Vec<_>>()
        .join("\n")
}

fn vote_prompt(context: &Context, plan: &Plan) -> String {
    format!(
        "Rate how well this plan accomplishes the task.\n\nTask: {}\n\nPlan:\n{}\n\n\
         Respond with ONLY a JSON object: {{\"score\": <number between 0 and 1>}}",
        context.task.description,
        plan_summary(plan)
    )
}

fn comparison_prompt(context: &Context, a: &Plan, b: &Plan) -> String {
    format!(
        "Which plan better accomplishes the task?\n\nTask: {}\n\nPlan A:\n{}\n\nPlan B:\n{}\n\n\
         Respond with ONLY a JSON object: {{\"winner\": \"A\"}} or {{\"winner\": \"B\"}}",
        context.task.description,
        plan_summary(a),
        plan_summary(b)
    )
}

/// Read a vote out of model output
///
/// Accepts `{"score": x}`, a bare number, or a number in prose. Scores on a
/// 0-10 scale are rescaled.
pub fn parse_vote(text: &str) -> Option<f64> {
    let raw = match extract_json(text) {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(value) => value.get("score").and_then(|v| v.as_f64()),
        None => None,
    }
    .or_else(|| {
        text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .find_map(|t| t.parse::<f64>().ok())
    })?;

    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let score = if raw > 1.0 && raw <= 10.0 { raw / 10.0 } else { raw };
    (score <= 1.0).then_some(score)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    A,
    B,
}

pub fn parse_winner(text: &str) -> Option<Winner> {
    let answer = match extract_json(text) {
        Some(value) => value
            .get("winner")
            .and_then(|v| v.as_str())
            .map(str::to_string)?,
        None => text.to_string(),
    };
    let first = answer
        .split(|c: char| !c.is_alphanumeric())
        .find(|t| !t.is_empty())?;
    match first.to_ascii_uppercase().as_str() {
        "A" => Some(Winner::A),
        "B" => Some(Winner::B),
        _ => None,
    }
}

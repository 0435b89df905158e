//! Plan scoring and selection
//!
//! A plan's score is a weighted sum of four terms in `[0, 1]`:
//!
//! - alignment with past experiences (similar to successes is good, similar
//!   to failures is bad, 0.5 when there is nothing to compare against)
//! - one minus a complexity penalty from effort and step count
//! - the plan's self-reported confidence
//! - one minus its risk
//!
//! Selection takes the highest score. Scores that round to the same multiple
//! of [`SCORE_EPSILON`] are ties, broken by lower effort, then lower risk,
//! then generation order.

use serde::Serialize;
use std::cmp::Ordering;
use weave_sdk::types::{Context, Plan};

use crate::config::ScoringWeights;
use crate::similarity;

/// Scores closer than this are considered equal
pub const SCORE_EPSILON: f64 = 1e-9;

/// Step count at which the step term of complexity saturates
const MAX_STEPS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub alignment: f64,
    pub complexity: f64,
    pub confidence: f64,
    pub risk: f64,
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct PlanScorer {
    weights: ScoringWeights,
    max_effort: f64,
}

impl PlanScorer {
    pub fn new(weights: ScoringWeights, max_effort: f64) -> Self {
        Self {
            weights: weights.normalized(),
            max_effort: if max_effort > 0.0 { max_effort } else { 1.0 },
        }
    }

    pub fn score(&self, plan: &Plan, context: &Context) -> ScoreBreakdown {
        let alignment = alignment(plan, context);
        let complexity = self.complexity(plan);
        let confidence = plan.confidence.clamp(0.0, 1.0);
        let risk = plan.risk_level.value();

        let w = &self.weights;
        let total = w.alignment * alignment
            + w.complexity * (1.0 - complexity)
            + w.confidence * confidence
            + w.risk * (1.0 - risk);

        ScoreBreakdown {
            alignment,
            complexity,
            confidence,
            risk,
            total: total.clamp(0.0, 1.0),
        }
    }

    /// Complexity penalty in `[0, 1]`
    pub fn complexity(&self, plan: &Plan) -> f64 {
        let effort = (plan.estimated_effort.max(0.0) / self.max_effort).min(1.0);
        let steps = (plan.steps.len() as f64 / MAX_STEPS).min(1.0);
        0.7 * effort + 0.3 * steps
    }
}

/// Success-weighted similarity between a plan and the past experiences in
/// its context
///
/// Each experience contributes in proportion to its relevance; a plan close
/// to a success moves towards 1, a plan close to a failure towards 0.
pub fn alignment(plan: &Plan, context: &Context) -> f64 {
    if context.past_experiences.is_empty() {
        return 0.5;
    }

    let plan_text = plan
        .steps
        .iter()
        .map(|s| format!("{} {}", s.description, s.action))
        .collect::<Vec<_>>()
        .join(" ");
    let plan_tokens = similarity::tokenize(&plan_text);

    let mut weighted = 0.0;
    let mut total = 0.0;
    for item in &context.past_experiences {
        let weight = item.relevance.max(0.0);
        if weight == 0.0 {
            continue;
        }
        let sim = similarity::jaccard(&plan_tokens, &similarity::tokenize(&item.content));
        let succeeded = item
            .metadata
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let value = if succeeded {
            0.5 + 0.5 * sim
        } else {
            0.5 - 0.5 * sim
        };
        weighted += weight * value;
        total += weight;
    }

    if total == 0.0 {
        0.5
    } else {
        (weighted / total).clamp(0.0, 1.0)
    }
}

/// Scores quantized to [`SCORE_EPSILON`] steps so "equal score" is transitive
fn score_bucket(score: f64) -> i64 {
    (score / SCORE_EPSILON).round() as i64
}

/// Selection order between two candidates: `Less` means `a` is preferred
///
/// `a_order` and `b_order` are generation positions.
pub fn preference(
    a: (&Plan, f64, usize),
    b: (&Plan, f64, usize),
) -> Ordering {
    let (pa, sa, oa) = a;
    let (pb, sb, ob) = b;
    score_bucket(sb)
        .cmp(&score_bucket(sa))
        .then_with(|| pa.estimated_effort.total_cmp(&pb.estimated_effort))
        .then_with(|| pa.risk_level.cmp(&pb.risk_level))
        .then_with(|| oa.cmp(&ob))
}

/// A generated plan with its score and generation position
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPlan {
    pub plan: Plan,
    pub score: ScoreBreakdown,
    pub order: usize,
}

impl ScoredPlan {
    fn key(&self) -> (&Plan, f64, usize) {
        (&self.plan, self.score.total, self.order)
    }
}

/// Which candidate to select, and whether the choice is low-confidence
///
/// Candidates under `min_confidence` are only considered when none reach
/// it. Returns `None` for an empty slice.
pub fn select(candidates: &[ScoredPlan], min_confidence: f64) -> Option<(usize, bool)> {
    let eligible: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].plan.confidence >= min_confidence)
        .collect();
    let (pool, low_confidence) = if eligible.is_empty() {
        ((0..candidates.len()).collect::<Vec<_>>(), true)
    } else {
        (eligible, false)
    };

    pool.into_iter()
        .min_by(|&a, &b| preference(candidates[a].key(), candidates[b].key()))
        .map(|best| (best, low_confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_sdk::types::{ContextItem, PlanStep, RiskLevel, SourceKind, Task};

    fn plan(confidence: f64, effort: f64, risk: RiskLevel, steps: &[&str]) -> Plan {
        Plan {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: "t".into(),
            steps: steps
                .iter()
                .enumerate()
                .map(|(i, d)| PlanStep::new(format!("s{}", i), *d))
                .collect(),
            confidence,
            estimated_effort: effort,
            reasoning_path: "direct".into(),
            risk_level: risk,
            rationale: String::new(),
        }
    }

    fn scored(plan: Plan, total: f64, order: usize) -> ScoredPlan {
        ScoredPlan {
            plan,
            score: ScoreBreakdown {
                alignment: 0.5,
                complexity: 0.0,
                confidence: 0.0,
                risk: 0.0,
                total,
            },
            order,
        }
    }

    #[test]
    fn test_alignment_neutral_without_history() {
        let context = Context::empty(Task::new("t", "d"));
        assert_eq!(alignment(&plan(0.5, 1.0, RiskLevel::Low, &["x"]), &context), 0.5);
    }

    #[test]
    fn test_alignment_follows_success() {
        let mut context = Context::empty(Task::new("t", "d"));
        context.past_experiences.push(
            ContextItem::new(
                "experiences",
                SourceKind::Experience,
                "e1",
                "t",
                "backup database restart service",
                1.0,
            )
            .with_metadata(json!({"success": true})),
        );
        context.past_experiences.push(
            ContextItem::new(
                "experiences",
                SourceKind::Experience,
                "e2",
                "t",
                "drop tables recreate schema",
                1.0,
            )
            .with_metadata(json!({"success": false})),
        );

        let like_success = plan(0.5, 1.0, RiskLevel::Low, &["backup database", "restart service"]);
        let like_failure = plan(0.5, 1.0, RiskLevel::Low, &["drop tables", "recreate schema"]);
        assert!(alignment(&like_success, &context) > 0.5);
        assert!(alignment(&like_failure, &context) < 0.5);
    }

    #[test]
    fn test_score_prefers_cheaper_safer_confident() {
        let scorer = PlanScorer::new(ScoringWeights::default(), 40.0);
        let context = Context::empty(Task::new("t", "d"));
        let good = scorer.score(&plan(0.9, 5.0, RiskLevel::Low, &["a"]), &context);
        let bad = scorer.score(&plan(0.4, 60.0, RiskLevel::High, &["a", "b", "c"]), &context);
        assert!(good.total > bad.total);
        assert!((0.0..=1.0).contains(&good.total));
        assert_eq!(bad.complexity, 0.7 + 0.3 * 0.3);
    }

    #[test]
    fn test_select_highest_score() {
        let candidates = vec![
            scored(plan(0.8, 5.0, RiskLevel::Low, &["a"]), 0.6, 0),
            scored(plan(0.8, 5.0, RiskLevel::Low, &["a"]), 0.7, 1),
            scored(plan(0.8, 5.0, RiskLevel::Low, &["a"]), 0.5, 2),
        ];
        assert_eq!(select(&candidates, 0.3), Some((1, false)));
    }

    #[test]
    fn test_tie_breaks() {
        // Equal score: lower effort wins
        let candidates = vec![
            scored(plan(0.8, 9.0, RiskLevel::Low, &["a"]), 0.6, 0),
            scored(plan(0.8, 3.0, RiskLevel::High, &["a"]), 0.6, 1),
        ];
        assert_eq!(select(&candidates, 0.3), Some((1, false)));

        // Equal score and effort: lower risk wins
        let candidates = vec![
            scored(plan(0.8, 3.0, RiskLevel::Medium, &["a"]), 0.6, 0),
            scored(plan(0.8, 3.0, RiskLevel::Low, &["a"]), 0.6, 1),
        ];
        assert_eq!(select(&candidates, 0.3), Some((1, false)));

        // Everything equal: generation order
        let candidates = vec![
            scored(plan(0.8, 3.0, RiskLevel::Low, &["a"]), 0.6, 0),
            scored(plan(0.8, 3.0, RiskLevel::Low, &["a"]), 0.6, 1),
        ];
        assert_eq!(select(&candidates, 0.3), Some((0, false)));
    }

    #[test]
    fn test_near_equal_scores_select_independent_of_input_order() {
        // Neighbouring scores sit less than one epsilon apart, but the first
        // and last are further apart than that
        let base = 0.6;
        let candidates = [
            scored(plan(0.8, 9.0, RiskLevel::Low, &["a"]), base, 0),
            scored(plan(0.8, 5.0, RiskLevel::Low, &["a"]), base + 0.6 * SCORE_EPSILON, 1),
            scored(plan(0.8, 1.0, RiskLevel::Low, &["a"]), base + 1.2 * SCORE_EPSILON, 2),
        ];
        let permutations = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        let mut picked = Vec::new();
        for permutation in permutations {
            let shuffled: Vec<ScoredPlan> =
                permutation.iter().map(|&i| candidates[i].clone()).collect();
            let (best, _) = select(&shuffled, 0.3).unwrap();
            picked.push(shuffled[best].plan.id.clone());
        }
        picked.dedup();
        assert_eq!(picked.len(), 1, "selection depended on input order");
    }

    #[test]
    fn test_score_bucket_equal_within_epsilon() {
        assert_eq!(score_bucket(0.25), score_bucket(0.25 + 0.1 * SCORE_EPSILON));
        assert!(score_bucket(0.26) > score_bucket(0.25));
    }

    #[test]
    fn test_low_confidence_excluded_but_fallback() {
        // Highest score is below the threshold, so the eligible one wins
        let candidates = vec![
            scored(plan(0.1, 3.0, RiskLevel::Low, &["a"]), 0.9, 0),
            scored(plan(0.5, 3.0, RiskLevel::Low, &["a"]), 0.4, 1),
        ];
        assert_eq!(select(&candidates, 0.3), Some((1, false)));

        // All below the threshold: best overall, flagged
        let candidates = vec![
            scored(plan(0.1, 3.0, RiskLevel::Low, &["a"]), 0.2, 0),
            scored(plan(0.2, 3.0, RiskLevel::Low, &["a"]), 0.25, 1),
            scored(plan(0.25, 3.0, RiskLevel::Low, &["a"]), 0.22, 2),
        ];
        assert_eq!(select(&candidates, 0.3), Some((1, true)));

        assert_eq!(select(&[], 0.3), None);
    }
}

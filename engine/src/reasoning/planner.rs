//! Plan generation
//!
//! Turns a [`Context`] into candidate [`Plan`]s through the LLM. Prompts ask
//! for a single JSON object; parsing is lenient about surrounding prose and
//! missing optional fields but rejects output with no usable steps.

use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use weave_sdk::types::{Context, FallbackAction, Plan, PlanStep, RiskLevel};

use crate::llm::{extract_json, CompletionOptions, LlmClient, LlmError, Purpose};

/// Default effort per step when the model gives no estimate
const EFFORT_PER_STEP: f64 = 5.0;

/// Context items quoted in a prompt, per bucket
const PROMPT_ITEMS: usize = 3;

#[derive(Debug, Clone, Error)]
pub enum CandidateError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Unusable plan output: {0}")]
    Parse(String),
}

/// Intermediate deserialization type for LLM JSON output
#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    steps: Vec<RawStep>,
    confidence: Option<f64>,
    estimated_effort: Option<f64>,
    risk_level: Option<String>,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    id: Option<String>,
    description: String,
    action: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    expected_outcome: Option<String>,
    service: Option<String>,
    #[serde(default)]
    fallbacks: Vec<RawFallback>,
    degradation: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFallback {
    Action(String),
    Full {
        action: String,
        #[serde(default)]
        priority: Option<u32>,
    },
}

/// Parse model output into a plan
///
/// Accepts either a plan object or a bare array of steps.
pub fn parse_plan(content: &str, task_id: &str, reasoning_path: &str) -> Result<Plan, CandidateError> {
    let value = extract_json(content)
        .ok_or_else(|| CandidateError::Parse("no JSON found in response".to_string()))?;

    let raw: RawPlan = if value.is_array() {
        let steps = serde_json::from_value(value)
            .map_err(|e| CandidateError::Parse(format!("invalid steps: {}", e)))?;
        RawPlan {
            steps,
            confidence: None,
            estimated_effort: None,
            risk_level: None,
            rationale: String::new(),
        }
    } else {
        serde_json::from_value(value)
            .map_err(|e| CandidateError::Parse(format!("invalid plan: {}", e)))?
    };

    if raw.steps.is_empty() {
        return Err(CandidateError::Parse("plan has no steps".to_string()));
    }

    let step_count = raw.steps.len();
    let steps = raw
        .steps
        .into_iter()
        .enumerate()
        .map(|(i, raw)| {
            let mut fallbacks: Vec<FallbackAction> = raw
                .fallbacks
                .into_iter()
                .enumerate()
                .map(|(j, f)| match f {
                    RawFallback::Action(action) => FallbackAction {
                        action,
                        priority: j as u32,
                    },
                    RawFallback::Full { action, priority } => FallbackAction {
                        action,
                        priority: priority.unwrap_or(j as u32),
                    },
                })
                .collect();
            fallbacks.sort_by_key(|f| f.priority);

            PlanStep {
                id: raw.id.unwrap_or_else(|| format!("step_{}", i + 1)),
                action: raw.action.unwrap_or_else(|| raw.description.clone()),
                description: raw.description,
                dependencies: raw.dependencies,
                expected_outcome: raw
                    .expected_outcome
                    .unwrap_or_else(|| "Step completed".to_string()),
                service: raw.service,
                fallbacks,
                degradation: raw.degradation,
            }
        })
        .collect();

    let effort = raw
        .estimated_effort
        .filter(|e| e.is_finite() && *e >= 0.0)
        .unwrap_or(step_count as f64 * EFFORT_PER_STEP);

    Ok(Plan {
        id: uuid::Uuid::new_v4().to_string(),
        task_id: task_id.to_string(),
        steps,
        confidence: raw
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0),
        estimated_effort: effort,
        reasoning_path: reasoning_path.to_string(),
        risk_level: raw
            .risk_level
            .as_deref()
            .map(RiskLevel::parse)
            .unwrap_or_default(),
        rationale: raw.rationale,
    })
}

const PLAN_FORMAT: &str = "Respond with ONLY a JSON object of this shape:\n\
{\"steps\": [{\"id\": \"step_1\", \"description\": \"...\", \"action\": \"...\", \
\"dependencies\": [], \"expected_outcome\": \"...\", \"service\": null, \
\"fallbacks\": [{\"action\": \"...\", \"priority\": 0}], \"degradation\": null}], \
\"confidence\": 0.0-1.0, \"estimated_effort\": <minutes>, \
\"risk_level\": \"low\"|\"medium\"|\"high\", \"rationale\": \"...\"}";

fn describe_context(context: &Context, out: &mut String) {
    let task = &context.task;
    let _ = writeln!(out, "Task: {}", task.description);
    let _ = writeln!(out, "Domain: {}", task.domain);

    let buckets = [
        ("Past experiences", &context.past_experiences),
        ("Related notes", &context.related_notes),
        ("External knowledge", &context.external_knowledge),
    ];
    for (label, items) in buckets {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{}:", label);
        for item in items.iter().take(PROMPT_ITEMS) {
            let _ = writeln!(out, "- {} ({:.2}): {}", item.title, item.relevance, item.content);
        }
    }
}

fn describe_plan(plan: &Plan, out: &mut String) {
    for step in &plan.steps {
        let _ = writeln!(out, "- [{}] {}", step.id, step.description);
    }
    let _ = writeln!(
        out,
        "(confidence {:.2}, effort {:.1}, risk {:?})",
        plan.confidence, plan.estimated_effort, plan.risk_level
    );
}

pub fn generation_prompt(context: &Context, candidate: usize, of: usize) -> String {
    let mut prompt = String::from(
        "You are a planner. Break the task into concrete, executable steps.\n\n",
    );
    describe_context(context, &mut prompt);
    let _ = write!(
        prompt,
        "\nThis is candidate {} of {}; take an approach of your own.\n\n{}",
        candidate + 1,
        of,
        PLAN_FORMAT
    );
    prompt
}

pub fn refinement_prompt(context: &Context, parent: &Plan, branch: usize) -> String {
    let mut prompt = String::from(
        "You are a planner improving an existing plan. Make it more robust or cheaper.\n\n",
    );
    describe_context(context, &mut prompt);
    prompt.push_str("\nCurrent plan:\n");
    describe_plan(parent, &mut prompt);
    let _ = write!(prompt, "\nRefinement #{}.\n\n{}", branch + 1, PLAN_FORMAT);
    prompt
}

/// Prompts the LLM for candidate plans
pub struct PlanGenerator {
    llm: Arc<dyn LlmClient>,
    temperature: f64,
}

impl PlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, temperature: f64) -> Self {
        Self { llm, temperature }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// Generate candidate `index` of `of`
    pub async fn generate(
        &self,
        context: &Context,
        index: usize,
        of: usize,
        seed: Option<u64>,
        reasoning_path: &str,
    ) -> Result<Plan, CandidateError> {
        let prompt = generation_prompt(context, index, of);
        let options = CompletionOptions::new(Purpose::PlanGeneration)
            .with_temperature(self.temperature)
            .with_seed(seed);
        let response = self.llm.complete(&prompt, &options).await?;
        debug!(path = reasoning_path, "Received candidate plan");
        parse_plan(&response, &context.task.id, reasoning_path)
    }

    /// Generate a refinement of `parent`
    pub async fn refine(
        &self,
        context: &Context,
        parent: &Plan,
        branch: usize,
        seed: Option<u64>,
        reasoning_path: &str,
    ) -> Result<Plan, CandidateError> {
        let prompt = refinement_prompt(context, parent, branch);
        let options = CompletionOptions::new(Purpose::PlanRefinement)
            .with_temperature(self.temperature)
            .with_seed(seed);
        let response = self.llm.complete(&prompt, &options).await?;
        parse_plan(&response, &context.task.id, reasoning_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_sdk::types::Task;

    #[test]
    fn test_parse_full_plan() {
        let content = r#"Here is my plan:
```json
{
  "steps": [
    {"id": "fetch", "description": "Fetch the feed", "service": "rss",
     "fallbacks": ["use cached feed", {"action": "skip feed", "priority": 5}],
     "degradation": {"items": []}},
    {"description": "Summarize items", "dependencies": ["fetch"]}
  ],
  "confidence": 0.8,
  "estimated_effort": 12,
  "risk_level": "LOW",
  "rationale": "cache first"
}
```
"#;
        let plan = parse_plan(content, "task-1", "direct/0").unwrap();
        assert_eq!(plan.task_id, "task-1");
        assert_eq!(plan.reasoning_path, "direct/0");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].id, "fetch");
        assert_eq!(plan.steps[0].service.as_deref(), Some("rss"));
        assert_eq!(plan.steps[0].fallbacks[0].action, "use cached feed");
        assert_eq!(plan.steps[0].fallbacks[1].priority, 5);
        assert!(plan.steps[0].degradation.is_some());
        assert_eq!(plan.steps[1].id, "step_2");
        assert_eq!(plan.steps[1].action, "Summarize items");
        assert_eq!(plan.steps[1].dependencies, vec!["fetch"]);
        assert_eq!(plan.confidence, 0.8);
        assert_eq!(plan.estimated_effort, 12.0);
        assert_eq!(plan.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_parse_bare_step_array_uses_defaults() {
        let plan = parse_plan(
            r#"[{"description": "a"}, {"description": "b"}]"#,
            "t",
            "direct/1",
        )
        .unwrap();
        assert_eq!(plan.confidence, 0.5);
        assert_eq!(plan.estimated_effort, 10.0);
        assert_eq!(plan.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_parse_rejects_unusable_output() {
        assert!(matches!(
            parse_plan("I cannot help with that", "t", "p"),
            Err(CandidateError::Parse(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"steps": []}"#, "t", "p"),
            Err(CandidateError::Parse(_))
        ));
    }

    #[test]
    fn test_confidence_clamped() {
        let plan = parse_plan(
            r#"{"steps": [{"description": "a"}], "confidence": 7}"#,
            "t",
            "p",
        )
        .unwrap();
        assert_eq!(plan.confidence, 1.0);
    }

    #[test]
    fn test_prompts_include_context() {
        let task = Task::new("Archive old logs", "ops");
        let context = Context::empty(task);
        let prompt = generation_prompt(&context, 1, 3);
        assert!(prompt.contains("Archive old logs"));
        assert!(prompt.contains("candidate 2 of 3"));

        let plan = parse_plan(r#"[{"description": "compress logs"}]"#, "t", "p").unwrap();
        let prompt = refinement_prompt(&context, &plan, 0);
        assert!(prompt.contains("compress logs"));
        assert!(prompt.contains("Refinement #1"));
    }
}

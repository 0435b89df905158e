//! Reflection stage
//!
//! Turns a finished outcome into lessons. A regex pass over the execution
//! logs runs first and always succeeds; its findings become recommendations
//! and are handed to one LLM pass that classifies lessons.
//!
//! Reflection never fails the loop. If the model is unavailable, slow, or
//! answers with something unusable, the lesson set is empty and the reason
//! is reported in [`Reflection::degraded`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use weave_sdk::types::{Impact, Lesson, LessonType, Outcome, Plan, Task};

use crate::config::ReflectionConfig;
use crate::llm::{extract_json, CompletionOptions, LlmClient, Purpose};

pub mod heuristics;
pub mod patterns;

pub use heuristics::{recommendations, scan_logs, Finding, FindingKind};
pub use patterns::{analyze_patterns, PatternAnalysis};

/// How many trailing log lines go into the prompt
const PROMPT_LOG_LINES: usize = 40;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reflection {
    pub lessons: Vec<Lesson>,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
    /// Why the lesson pass produced nothing, if it failed
    pub degraded: Option<String>,
}

#[derive(Deserialize)]
struct RawLesson {
    #[serde(rename = "type", alias = "lesson_type", default)]
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default, alias = "domains")]
    applicable_domains: Vec<String>,
}

/// Parse lessons from model output
///
/// Accepts `{"lessons": [...]}` or a bare array. Entries with an unknown type
/// or an empty description are skipped; entries without domains get
/// `domain`.
pub fn parse_lessons(content: &str, domain: &str) -> Result<Vec<Lesson>, String> {
    let value = extract_json(content).ok_or_else(|| "no JSON in reflection output".to_string())?;
    let list = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut map) => map
            .remove("lessons")
            .ok_or_else(|| "reflection output has no 'lessons' field".to_string())?,
        _ => return Err("reflection output is not an object or array".into()),
    };
    let raw: Vec<RawLesson> =
        serde_json::from_value(list).map_err(|e| format!("malformed lessons: {}", e))?;

    Ok(raw
        .into_iter()
        .filter_map(|r| {
            let lesson_type = LessonType::parse(&r.kind)?;
            let description = r.description.trim().to_string();
            if description.is_empty() {
                return None;
            }
            let mut applicable_domains: Vec<String> = r
                .applicable_domains
                .into_iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
            if applicable_domains.is_empty() {
                applicable_domains.push(domain.to_string());
            }
            Some(Lesson {
                lesson_type,
                description,
                actions: r.actions,
                impact: r.impact.as_deref().map(Impact::parse).unwrap_or_default(),
                applicable_domains,
            })
        })
        .collect())
}

pub fn reflection_prompt(task: &Task, plan: &Plan, outcome: &Outcome, findings: &[Finding]) -> String {
    let steps = plan
        .steps
        .iter()
        .map(|s| format!("- {}: {}", s.id, s.description))
        .collect::<Vec<_>>()
        .join("\n");
    let skip = outcome.logs.len().saturating_sub(PROMPT_LOG_LINES);
    let logs = outcome.logs[skip..]
        .iter()
        .map(|l| {
            format!(
                "[{:?}] {} {}",
                l.level,
                l.step_id.as_deref().unwrap_or("-"),
                l.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let findings = if findings.is_empty() {
        "none".to_string()
    } else {
        findings
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You review finished tasks and extract reusable lessons.\n\n\
         Task ({domain}): {task}\n\
         Plan:\n{steps}\n\n\
         Result: {result}{error}\n\
         Steps attempted {attempted}, completed {completed}, failed {failed}; \
         retries {retries}, fallbacks {fallbacks}.\n\n\
         Detected patterns:\n{findings}\n\n\
         Recent log lines:\n{logs}\n\n\
         Respond with JSON only:\n\
         {{\"lessons\": [{{\"type\": \"success|failure|optimization|error\", \
         \"description\": \"...\", \"actions\": [\"...\"], \
         \"impact\": \"low|medium|high\", \"applicable_domains\": [\"...\"]}}]}}",
        domain = task.domain,
        task = task.description,
        steps = steps,
        result = if outcome.success { "success" } else { "failure" },
        error = outcome
            .error
            .as_deref()
            .map(|e| format!(" ({})", e))
            .unwrap_or_default(),
        attempted = outcome.metrics.steps_attempted,
        completed = outcome.metrics.steps_completed,
        failed = outcome.metrics.steps_failed,
        retries = outcome.metrics.retries,
        fallbacks = outcome.metrics.fallbacks_used,
        findings = findings,
        logs = logs,
    )
}

pub struct ReflectionSystem {
    llm: Arc<dyn LlmClient>,
    config: ReflectionConfig,
}

impl ReflectionSystem {
    pub fn new(llm: Arc<dyn LlmClient>, config: ReflectionConfig) -> Self {
        Self { llm, config }
    }

    /// Reflect on one outcome; never fails
    pub async fn reflect(&self, task: &Task, plan: &Plan, outcome: &Outcome) -> Reflection {
        let findings = scan_logs(&outcome.logs);
        let recommendations = recommendations(&findings);
        debug!(
            task_id = %task.id,
            findings = findings.len(),
            "Scanned outcome logs"
        );

        if !self.config.enabled {
            return Reflection {
                lessons: Vec::new(),
                findings,
                recommendations,
                degraded: None,
            };
        }

        let prompt = reflection_prompt(task, plan, outcome, &findings);
        let options = CompletionOptions::new(Purpose::Reflection).with_temperature(0.2);
        let call = tokio::time::timeout(self.config.timeout(), self.llm.complete(&prompt, &options));

        let result = match call.await {
            Ok(Ok(content)) => parse_lessons(&content, &task.domain),
            Ok(Err(e)) => Err(format!("lesson extraction failed: {}", e)),
            Err(_) => Err(format!(
                "lesson extraction timed out after {}s",
                self.config.timeout_secs
            )),
        };

        match result {
            Ok(lessons) => {
                debug!(task_id = %task.id, lessons = lessons.len(), "Extracted lessons");
                Reflection {
                    lessons,
                    findings,
                    recommendations,
                    degraded: None,
                }
            }
            Err(reason) => {
                warn!(task_id = %task.id, "Reflection degraded: {}", reason);
                Reflection {
                    lessons: Vec::new(),
                    findings,
                    recommendations,
                    degraded: Some(reason),
                }
            }
        }
    }
}

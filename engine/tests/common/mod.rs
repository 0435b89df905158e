//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use weave_engine::config::{Config, MemoryBackend};
use weave_engine::llm::{CompletionOptions, FnClient, LlmClient, Purpose};
use weave_engine::memory::{InMemoryStore, MemorySystem};
use weave_sdk::errors::DependencyError;
use weave_sdk::interfaces::{ContextSource, StepExecutor};
use weave_sdk::types::{ContextItem, PlanStep, SourceKind, SourceResult, Task};

pub const LESSONS: &str = r#"{"lessons": [
    {"type": "success", "description": "Drafting from prior notes kept the summary short", "actions": ["reuse notes"], "impact": "medium"}
]}"#;

/// A plan in the JSON shape the planner expects
pub fn plan_json(steps: &[&str], confidence: f64, effort: f64, risk: &str) -> String {
    json!({
        "steps": steps.iter().map(|s| json!({"description": s})).collect::<Vec<_>>(),
        "confidence": confidence,
        "estimated_effort": effort,
        "risk_level": risk,
        "rationale": "scripted",
    })
    .to_string()
}

/// Candidate `i` (1-based in the prompt) gets `plans[i - 1]`; refinements,
/// votes and comparisons get the first plan; reflection gets `lessons`
pub fn scripted_llm(plans: Vec<String>, lessons: &'static str) -> Arc<dyn LlmClient> {
    Arc::new(FnClient::new(
        "scripted",
        move |prompt: &str, options: &CompletionOptions| match options.purpose {
            Purpose::Reflection => Ok(lessons.to_string()),
            Purpose::PlanGeneration => {
                let index = prompt
                    .split("candidate ")
                    .nth(1)
                    .and_then(|rest| rest.split_whitespace().next())
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(1);
                Ok(plans[(index - 1).min(plans.len() - 1)].clone())
            }
            _ => Ok(plans[0].clone()),
        },
    ))
}

/// Config with in-memory backend and direct reasoning
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.memory.backend = MemoryBackend::Memory;
    config.tree.mode = weave_engine::config::TreeMode::Never;
    config.reasoning.seed = Some(7);
    config
}

pub fn memory() -> Arc<MemorySystem> {
    Arc::new(MemorySystem::new(
        Arc::new(InMemoryStore::new()),
        test_config().memory,
    ))
}

/// Source that returns fixed documents, fails, or hangs
pub struct FakeSource {
    pub name: String,
    pub kind: SourceKind,
    pub behavior: SourceBehavior,
}

pub enum SourceBehavior {
    Items(Vec<(String, f64)>),
    Fail,
    Hang,
}

impl FakeSource {
    pub fn items(name: &str, kind: SourceKind, titles: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            behavior: SourceBehavior::Items(
                titles.iter().map(|(t, r)| (t.to_string(), *r)).collect(),
            ),
        })
    }

    pub fn failing(name: &str, kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            behavior: SourceBehavior::Fail,
        })
    }

    pub fn hanging(name: &str, kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            behavior: SourceBehavior::Hang,
        })
    }
}

#[async_trait]
impl ContextSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn gather(&self, _task: &Task, limit: usize) -> Result<SourceResult, DependencyError> {
        match &self.behavior {
            SourceBehavior::Items(items) => {
                let items = items
                    .iter()
                    .take(limit)
                    .enumerate()
                    .map(|(i, (title, relevance))| {
                        ContextItem::new(
                            self.name.clone(),
                            self.kind,
                            format!("{}-{}", self.name, i),
                            title.clone(),
                            format!("Body of {}", title),
                            *relevance,
                        )
                    })
                    .collect();
                Ok(SourceResult::new(self.name.clone(), self.kind).with_items(items))
            }
            SourceBehavior::Fail => Err(DependencyError::Unavailable(format!(
                "{} is down",
                self.name
            ))),
            SourceBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(SourceResult::new(self.name.clone(), self.kind))
            }
        }
    }
}

/// Executor that replays queued errors, then echoes the step
#[derive(Default)]
pub struct ScriptedExecutor {
    pub errors: Mutex<VecDeque<DependencyError>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn failing_with(errors: Vec<DependencyError>) -> Arc<Self> {
        Arc::new(Self {
            errors: Mutex::new(errors.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute_step(&self, step: &PlanStep, action: &str) -> Result<Value, DependencyError> {
        self.calls.lock().push(format!("{}:{}", step.id, action));
        if let Some(e) = self.errors.lock().pop_front() {
            return Err(e);
        }
        Ok(json!({ "done": step.description }))
    }
}

//! Loop orchestrator
//!
//! Drives one task through perception, reasoning, execution, reflection and
//! storage. Every move goes through [`state::transition`], so the recorded
//! trace is always a legal walk of the state machine, and every transition is
//! published on the [`EventBus`].
//!
//! Only perception and reasoning are loop-fatal. A failed execution still
//! produces an outcome, which is reflected on and stored like any other.
//! Reflection and storage problems are downgraded to warnings, and the
//! outcome reaches the caller regardless.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};
use weave_sdk::interfaces::{ContextSource, StepExecutor};
use weave_sdk::types::{Experience, Lesson, Outcome, Plan, Task};

use crate::config::Config;
use crate::events::{EventBus, LoopEvent};
use crate::execution::{ExecutionError, ExecutionSystem};
use crate::llm::LlmClient;
use crate::memory::{MemoryError, MemorySystem};
use crate::perception::{ExperienceSource, PerceptionError, PerceptionSystem, SourceReport};
use crate::reasoning::{CandidateScore, ReasoningError, ReasoningSystem, TreeStats};
use crate::reflection::{PatternAnalysis, ReflectionSystem};
use crate::resilience::DependencyGuard;

pub mod state;

pub use state::{transition, InvalidTransition, LoopState, Stage, Trigger};

/// Cause of a loop-level failure
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Perception(#[from] PerceptionError),

    #[error(transparent)]
    Reasoning(#[from] ReasoningError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// A task that could not complete, tagged with the failing stage
#[derive(Debug, Error)]
#[error("{stage} stage failed: {cause}")]
pub struct LoopError {
    pub stage: Stage,
    pub cause: StageError,
}

/// Everything one loop iteration produced
#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub task_id: String,
    pub outcome: Outcome,
    pub selected_plan: Plan,
    pub alternative_plans: Vec<Plan>,
    pub reasoning_path: String,
    pub reasoning_confidence: f64,
    pub low_confidence: bool,
    pub perception_confidence: f64,
    pub sources: Vec<SourceReport>,
    pub candidates: Vec<CandidateScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_stats: Option<TreeStats>,
    pub lessons: Vec<Lesson>,
    pub recommendations: Vec<String>,
    /// Set once the experience is stored
    pub experience_id: Option<String>,
    /// Every state the loop passed through, starting at `Idle`
    pub trace: Vec<LoopState>,
    pub warnings: Vec<String>,
}

/// Walks the state machine for one task and publishes each move
struct Run<'a> {
    task_id: &'a str,
    state: LoopState,
    trace: Vec<LoopState>,
    events: &'a EventBus,
}

impl<'a> Run<'a> {
    fn new(task_id: &'a str, events: &'a EventBus) -> Self {
        Self {
            task_id,
            state: LoopState::Idle,
            trace: vec![LoopState::Idle],
            events,
        }
    }

    fn stage(&self) -> Stage {
        match self.state {
            LoopState::Error { stage }
            | LoopState::Recovery { stage }
            | LoopState::Failed { stage } => stage,
            other => other.active_stage().unwrap_or(Stage::Perception),
        }
    }

    fn fire(&mut self, trigger: Trigger) -> Result<(), LoopError> {
        let next = transition(self.state, trigger).map_err(|e| LoopError {
            stage: self.stage(),
            cause: e.into(),
        })?;
        self.events.publish(LoopEvent::StageTransition {
            task_id: self.task_id.to_string(),
            from: self.state,
            to: next,
            at: Utc::now(),
        });
        self.state = next;
        self.trace.push(next);
        Ok(())
    }

    /// Error, recover, and resume at the following stage
    fn recover(&mut self) -> Result<(), LoopError> {
        self.fire(Trigger::Fail)?;
        self.fire(Trigger::Recover)?;
        self.fire(Trigger::Resume)
    }

    /// Error and abort, producing the error for the caller
    fn abort(&mut self, cause: StageError) -> LoopError {
        let stage = self.stage();
        for trigger in [Trigger::Fail, Trigger::Abort] {
            if let Err(e) = self.fire(trigger) {
                warn!(task_id = %self.task_id, "{}", e);
            }
        }
        self.events.publish(LoopEvent::TaskFailed {
            task_id: self.task_id.to_string(),
            stage,
            error: cause.to_string(),
            at: Utc::now(),
        });
        LoopError { stage, cause }
    }
}

pub struct Orchestrator {
    perception: PerceptionSystem,
    reasoning: ReasoningSystem,
    execution: ExecutionSystem,
    reflection: ReflectionSystem,
    memory: Arc<MemorySystem>,
    events: Arc<EventBus>,
}

impl Orchestrator {
    pub fn new(
        perception: PerceptionSystem,
        reasoning: ReasoningSystem,
        execution: ExecutionSystem,
        reflection: ReflectionSystem,
        memory: Arc<MemorySystem>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            perception,
            reasoning,
            execution,
            reflection,
            memory,
            events,
        }
    }

    /// Wire every stage from configuration
    ///
    /// Past experiences from `memory` are registered as the first context
    /// source; add others with [`Orchestrator::with_source`].
    pub fn from_config(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn StepExecutor>,
        memory: Arc<MemorySystem>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let guard = Arc::new(
            DependencyGuard::new(&config.execution.breaker, &config.execution.rate_limit)
                .with_events(Arc::clone(&events)),
        );

        let perception = PerceptionSystem::new(config.perception.clone())
            .with_source(Arc::new(ExperienceSource::new(Arc::clone(&memory))));
        let reasoning = ReasoningSystem::new(
            Arc::clone(&llm),
            config.reasoning.clone(),
            config.tree.clone(),
            config.llm.temperature,
        );
        let execution = ExecutionSystem::new(executor, guard, config.execution.clone())
            .with_events(Arc::clone(&events));
        let reflection = ReflectionSystem::new(llm, config.reflection.clone());

        Self::new(perception, reasoning, execution, reflection, memory, events)
    }

    pub fn with_source(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.perception.add_source(source);
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn guard(&self) -> &Arc<DependencyGuard> {
        self.execution.guard()
    }

    pub fn memory(&self) -> &Arc<MemorySystem> {
        &self.memory
    }

    /// Run the loop and return only the outcome
    pub async fn execute(&self, task: Task) -> Result<Outcome, LoopError> {
        self.run(task).await.map(|report| report.outcome)
    }

    /// Run the full loop for `task`
    pub async fn run(&self, task: Task) -> Result<LoopReport, LoopError> {
        let started = Instant::now();
        let mut warnings = Vec::new();
        let mut run = Run::new(&task.id, &self.events);

        info!(task_id = %task.id, domain = %task.domain, "Starting task");
        run.fire(Trigger::Start)?;

        let perception = match self.perception.perceive(&task).await {
            Ok(perception) => perception,
            Err(e) => return Err(run.abort(e.into())),
        };
        for source in perception.failed_sources() {
            warnings.push(format!("Context source '{}' contributed nothing", source.name));
        }
        run.fire(Trigger::Advance)?;

        let reasoning = match self.reasoning.reason(&perception.context).await {
            Ok(reasoning) => reasoning,
            Err(e) => return Err(run.abort(e.into())),
        };
        if reasoning.low_confidence {
            warnings.push(format!(
                "No plan reached the minimum confidence; proceeding with {} (confidence {:.2})",
                reasoning.selected.id, reasoning.confidence
            ));
        }
        run.fire(Trigger::Advance)?;

        let outcome = match self.execution.execute(&reasoning.selected).await {
            Ok(outcome) => {
                run.fire(Trigger::Advance)?;
                outcome
            }
            Err(e) => {
                warn!(task_id = %task.id, "Execution failed: {}", e);
                warnings.push(format!("Execution failed: {}", e));
                run.recover()?;
                e.outcome
            }
        };

        let reflection = self
            .reflection
            .reflect(&task, &reasoning.selected, &outcome)
            .await;
        match &reflection.degraded {
            Some(reason) => {
                warnings.push(format!("Reflection degraded: {}", reason));
                run.recover()?;
            }
            None => run.fire(Trigger::Advance)?,
        }

        let experience = Experience::new(
            task.clone(),
            perception.context,
            reasoning.selected.clone(),
            outcome.clone(),
            reflection.lessons.clone(),
        );
        let experience_id = match self.memory.store(&experience).await {
            Ok(stored) => {
                run.fire(Trigger::Advance)?;
                Some(stored.id)
            }
            Err(e) => {
                warn!(task_id = %task.id, "Failed to store experience: {}", e);
                warnings.push(format!("Experience not stored: {}", e));
                run.recover()?;
                None
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.events.publish(LoopEvent::TaskCompleted {
            task_id: task.id.clone(),
            success: outcome.success,
            duration_ms,
            at: Utc::now(),
        });
        info!(
            task_id = %task.id,
            success = outcome.success,
            duration_ms,
            warnings = warnings.len(),
            "Task finished"
        );

        Ok(LoopReport {
            task_id: task.id.clone(),
            outcome,
            selected_plan: reasoning.selected,
            alternative_plans: reasoning.alternatives,
            reasoning_path: reasoning.reasoning_path,
            reasoning_confidence: reasoning.confidence,
            low_confidence: reasoning.low_confidence,
            perception_confidence: perception.confidence,
            sources: perception.sources,
            candidates: reasoning.candidates,
            tree_stats: reasoning.tree_stats,
            lessons: reflection.lessons,
            recommendations: reflection.recommendations,
            experience_id,
            trace: run.trace,
            warnings,
        })
    }

    /// Recurring patterns across the `limit` most recent experiences
    pub async fn analyze_patterns(&self, limit: usize) -> Result<PatternAnalysis, MemoryError> {
        let experiences = self.memory.recent(limit).await?;
        Ok(crate::reflection::analyze_patterns(&experiences))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::events::EventKind;
    use crate::llm::{CompletionOptions, FnClient, LlmError, Purpose};
    use crate::memory::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use weave_sdk::errors::{DependencyError, StoreError};
    use weave_sdk::interfaces::{MemoryRecord, MemoryStore};
    use weave_sdk::types::PlanStep;

    const PLAN: &str = r#"{"steps": [{"description": "gather inputs"}, {"description": "write summary"}],
        "confidence": 0.8, "estimated_effort": 4, "risk_level": "low"}"#;
    const LESSONS: &str = r#"{"lessons": [{"type": "success", "description": "Two steps were enough"}]}"#;

    fn llm(reflection: Result<&'static str, LlmError>) -> Arc<dyn LlmClient> {
        Arc::new(FnClient::new("scripted", move |_: &str, o: &CompletionOptions| {
            match o.purpose {
                Purpose::Reflection => reflection.clone().map(str::to_string),
                _ => Ok(PLAN.to_string()),
            }
        }))
    }

    struct Echo {
        fail: Option<DependencyError>,
    }

    #[async_trait]
    impl StepExecutor for Echo {
        async fn execute_step(&self, step: &PlanStep, _: &str) -> Result<Value, DependencyError> {
            match &self.fail {
                Some(e) => Err(e.clone()),
                None => Ok(json!(step.description)),
            }
        }
    }

    /// Accepts reads, rejects writes
    struct ReadOnly;

    #[async_trait]
    impl MemoryStore for ReadOnly {
        async fn store(
            &self,
            _: &str,
            _: Value,
            _: &str,
            _: Option<std::time::Duration>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }

        async fn search(&self, _: &str, _: &str, _: usize) -> Result<Vec<MemoryRecord>, StoreError> {
            Ok(vec![])
        }

        async fn recent(&self, _: &str, _: usize) -> Result<Vec<MemoryRecord>, StoreError> {
            Ok(vec![])
        }

        async fn evict_expired(&self, _: chrono::DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn orchestrator(
        llm: Arc<dyn LlmClient>,
        executor: Echo,
        store: Arc<dyn MemoryStore>,
    ) -> Orchestrator {
        let config = Config::default();
        let memory = Arc::new(MemorySystem::new(store, MemoryConfig::default()));
        Orchestrator::from_config(&config, llm, Arc::new(executor), memory)
    }

    #[tokio::test]
    async fn test_happy_path_trace_and_storage() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = orchestrator(llm(Ok(LESSONS)), Echo { fail: None }, store);
        let mut rx = orchestrator.events().subscribe(EventKind::StageTransition);

        let report = orchestrator
            .run(Task::new("Summarize the meeting notes", "docs"))
            .await
            .unwrap();

        assert!(report.outcome.success);
        assert_eq!(report.lessons.len(), 1);
        assert!(report.experience_id.is_some());
        assert_eq!(
            report.trace,
            vec![
                LoopState::Idle,
                LoopState::Perceiving,
                LoopState::Reasoning,
                LoopState::Executing,
                LoopState::Reflecting,
                LoopState::Storing,
                LoopState::Complete,
            ]
        );

        let mut transitions = 0;
        while rx.try_recv().is_ok() {
            transitions += 1;
        }
        assert_eq!(transitions, 6);

        let stored = orchestrator.memory().recent(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].lessons.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_execution_is_still_reflected_and_stored() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = orchestrator(
            llm(Ok(LESSONS)),
            Echo {
                fail: Some(DependencyError::Invalid("bad input".into())),
            },
            store,
        );

        let report = orchestrator
            .run(Task::new("Convert the spreadsheet", "data"))
            .await
            .unwrap();

        assert!(!report.outcome.success);
        assert!(report.outcome.error.is_some());
        assert!(report.experience_id.is_some());
        assert!(report.trace.contains(&LoopState::Recovery {
            stage: Stage::Execution
        }));
        assert_eq!(report.trace.last(), Some(&LoopState::Complete));
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_reflection_and_storage_failures_keep_outcome() {
        let orchestrator = orchestrator(
            llm(Err(LlmError::Timeout)),
            Echo { fail: None },
            Arc::new(ReadOnly),
        );

        let outcome = orchestrator
            .execute(Task::new("Summarize the meeting notes", "docs"))
            .await
            .unwrap();
        assert!(outcome.success);

        let report = orchestrator
            .run(Task::new("Summarize the meeting notes", "docs"))
            .await
            .unwrap();
        assert!(report.lessons.is_empty());
        assert!(report.experience_id.is_none());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.trace.contains(&LoopState::Recovery {
            stage: Stage::Reflection
        }));
        assert!(report.trace.contains(&LoopState::Recovery {
            stage: Stage::Storage
        }));
    }

    #[tokio::test]
    async fn test_no_plans_is_fatal_at_reasoning() {
        let llm: Arc<dyn LlmClient> = Arc::new(FnClient::new(
            "broken",
            |_: &str, _: &CompletionOptions| Ok("I cannot help with that".to_string()),
        ));
        let orchestrator = orchestrator(llm, Echo { fail: None }, Arc::new(InMemoryStore::new()));
        let mut failures = orchestrator.events().subscribe(EventKind::TaskFailed);

        let err = orchestrator
            .run(Task::new("Summarize the meeting notes", "docs"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Reasoning);
        assert!(matches!(err.cause, StageError::Reasoning(ReasoningError::NoPlans { .. })));
        assert!(err.to_string().starts_with("reasoning stage failed"));
        assert!(matches!(
            failures.try_recv(),
            Ok(LoopEvent::TaskFailed {
                stage: Stage::Reasoning,
                ..
            })
        ));
    }
}

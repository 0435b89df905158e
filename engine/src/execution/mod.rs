//! Execution stage
//!
//! Runs a plan's steps in dependency order through the injected
//! [`StepExecutor`]. Each step goes through its fallback chain, and each
//! action in the chain through the retry policy and the shared
//! [`DependencyGuard`].
//!
//! The whole run is bounded by an overall timeout. Logs and counters live in
//! a shared recorder, so a timed-out or failed run still returns everything
//! accumulated so far inside the error.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use weave_sdk::interfaces::StepExecutor;
use weave_sdk::types::{LogLevel, Outcome, Plan, PlanStep};

use crate::config::ExecutionConfig;
use crate::events::EventBus;
use crate::resilience::{DependencyGuard, ErrorCategory};

pub mod fallback;
pub mod outcome;
pub mod retry;

pub use fallback::{Resolution, StepSuccess};
pub use outcome::{OutcomeRecorder, SharedRecorder};
pub use retry::{ActionFailure, ActionRunner};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Step dependencies cannot be ordered
    InvalidPlan { reason: String },
    /// A step exhausted its fallback chain
    StepFailed {
        step_id: String,
        category: ErrorCategory,
        message: String,
    },
    /// The overall deadline passed
    Timeout { after_ms: u64 },
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPlan { reason } => write!(f, "invalid plan: {}", reason),
            Self::StepFailed {
                step_id,
                category,
                message,
            } => write!(f, "step '{}' failed [{}]: {}", step_id, category, message),
            Self::Timeout { after_ms } => write!(f, "execution timed out after {}ms", after_ms),
        }
    }
}

/// A failed execution, carrying the partial outcome
#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub outcome: Outcome,
}

/// Order step indices so every step follows its dependencies
///
/// Among steps that are ready at the same time, plan order wins.
pub fn dependency_order(steps: &[PlanStep]) -> Result<Vec<usize>, String> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if index.insert(step.id.as_str(), i).is_some() {
            return Err(format!("duplicate step id '{}'", step.id));
        }
    }

    let mut pending: Vec<usize> = vec![0; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        let unique: HashSet<&str> = step.dependencies.iter().map(String::as_str).collect();
        for dep in unique {
            let Some(&d) = index.get(dep) else {
                return Err(format!("step '{}' depends on unknown step '{}'", step.id, dep));
            };
            if d == i {
                return Err(format!("step '{}' depends on itself", step.id));
            }
            pending[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut order = Vec::with_capacity(steps.len());
    let mut done = vec![false; steps.len()];
    while order.len() < steps.len() {
        let Some(next) = (0..steps.len()).find(|&i| !done[i] && pending[i] == 0) else {
            let stuck: Vec<&str> = (0..steps.len())
                .filter(|&i| !done[i])
                .map(|i| steps[i].id.as_str())
                .collect();
            return Err(format!("dependency cycle among steps {:?}", stuck));
        };
        done[next] = true;
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
        }
    }
    Ok(order)
}

pub struct ExecutionSystem {
    executor: Arc<dyn StepExecutor>,
    guard: Arc<DependencyGuard>,
    config: ExecutionConfig,
    events: Option<Arc<EventBus>>,
}

impl ExecutionSystem {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        guard: Arc<DependencyGuard>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            executor,
            guard,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn guard(&self) -> &Arc<DependencyGuard> {
        &self.guard
    }

    /// Execute every step of `plan`
    pub async fn execute(&self, plan: &Plan) -> Result<Outcome, ExecutionError> {
        let recorder = OutcomeRecorder::shared();

        let order = match dependency_order(&plan.steps) {
            Ok(order) => order,
            Err(reason) => {
                recorder
                    .lock()
                    .log(LogLevel::Error, None, format!("Invalid plan: {}", reason));
                let outcome = recorder.lock().finish(false, Some(reason.clone()));
                return Err(ExecutionError {
                    kind: ExecutionErrorKind::InvalidPlan { reason },
                    outcome,
                });
            }
        };

        info!(
            task_id = %plan.task_id,
            plan_id = %plan.id,
            steps = plan.steps.len(),
            "Executing plan"
        );

        let deadline = self.config.timeout();
        let run = tokio::time::timeout(deadline, self.run_steps(plan, &order, &recorder)).await;

        match run {
            Ok(Ok(())) => {
                let outcome = recorder.lock().finish(true, None);
                info!(
                    task_id = %plan.task_id,
                    duration_ms = outcome.duration_ms,
                    "Plan executed successfully"
                );
                Ok(outcome)
            }
            Ok(Err(kind)) => {
                let outcome = recorder.lock().finish(false, Some(kind.to_string()));
                Err(ExecutionError { kind, outcome })
            }
            Err(_) => {
                let after_ms = deadline.as_millis() as u64;
                let kind = ExecutionErrorKind::Timeout { after_ms };
                let outcome = {
                    let mut recorder = recorder.lock();
                    let interrupted = recorder.interrupt();
                    recorder.log(
                        LogLevel::Error,
                        interrupted.as_deref(),
                        format!("Execution timed out after {}ms", after_ms),
                    );
                    recorder.finish(false, Some(kind.to_string()))
                };
                warn!(task_id = %plan.task_id, "Plan execution timed out");
                Err(ExecutionError { kind, outcome })
            }
        }
    }

    async fn run_steps(
        &self,
        plan: &Plan,
        order: &[usize],
        recorder: &SharedRecorder,
    ) -> Result<(), ExecutionErrorKind> {
        let runner = ActionRunner {
            executor: self.executor.as_ref(),
            guard: &self.guard,
            retry: &self.config.retry,
            step_timeout: self.config.step_timeout(),
            events: self.events.as_deref(),
            recorder,
            task_id: &plan.task_id,
        };

        for &i in order {
            let step = &plan.steps[i];
            let dependency = step
                .service
                .as_deref()
                .unwrap_or(&self.config.default_dependency);

            recorder.lock().step_started(&step.id);
            runner.log(
                LogLevel::Info,
                step,
                format!("Starting step: {}", step.description),
            );

            match fallback::run_chain(&runner, step, dependency).await {
                Ok(success) => {
                    let mut recorder = recorder.lock();
                    recorder.log(
                        LogLevel::Info,
                        Some(&step.id),
                        format!("Step completed ({:?})", success.resolution),
                    );
                    recorder.step_completed(&step.id, success.value);
                }
                Err(failure) => {
                    let mut recorder = recorder.lock();
                    recorder.step_failed();
                    recorder.log(
                        LogLevel::Error,
                        Some(&step.id),
                        format!("Step failed {}", failure.error),
                    );
                    return Err(ExecutionErrorKind::StepFailed {
                        step_id: step.id.clone(),
                        category: failure.error.category,
                        message: failure.error.message,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, RateLimitConfig};
    use crate::resilience::BreakerState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::time::Duration;
    use weave_sdk::errors::DependencyError;
    use weave_sdk::types::RiskLevel;

    /// Per-step scripted failures; unscripted calls succeed
    #[derive(Default)]
    struct Scripted {
        failures: Mutex<HashMap<String, VecDeque<DependencyError>>>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl Scripted {
        fn fail(self, step: &str, errors: Vec<DependencyError>) -> Self {
            self.failures.lock().insert(step.to_string(), errors.into());
            self
        }
    }

    #[async_trait]
    impl StepExecutor for Scripted {
        async fn execute_step(&self, step: &PlanStep, _action: &str) -> Result<Value, DependencyError> {
            self.calls.lock().push(step.id.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self
                .failures
                .lock()
                .get_mut(&step.id)
                .and_then(|q| q.pop_front());
            match next {
                Some(e) => Err(e),
                None => Ok(json!({ "step": step.id })),
            }
        }
    }

    fn plan(steps: Vec<PlanStep>) -> Plan {
        Plan {
            id: "p1".into(),
            task_id: "t1".into(),
            steps,
            confidence: 0.8,
            estimated_effort: 3.0,
            reasoning_path: "direct/0".into(),
            risk_level: RiskLevel::Low,
            rationale: String::new(),
        }
    }

    fn system(executor: Scripted, config: ExecutionConfig) -> (ExecutionSystem, Arc<Scripted>) {
        let executor = Arc::new(executor);
        let guard = Arc::new(DependencyGuard::new(
            &BreakerConfig::default(),
            &RateLimitConfig::default(),
        ));
        (
            ExecutionSystem::new(executor.clone(), guard, config),
            executor,
        )
    }

    #[test]
    fn test_dependency_order_is_stable() {
        let steps = vec![
            PlanStep::new("c", "c").depends_on("a"),
            PlanStep::new("a", "a"),
            PlanStep::new("b", "b"),
            PlanStep::new("d", "d").depends_on("c").depends_on("b"),
        ];
        // c becomes ready once a runs and comes before b in plan order
        assert_eq!(dependency_order(&steps).unwrap(), vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_dependency_order_rejects_bad_graphs() {
        let cycle = vec![
            PlanStep::new("a", "a").depends_on("b"),
            PlanStep::new("b", "b").depends_on("a"),
        ];
        assert!(dependency_order(&cycle).unwrap_err().contains("cycle"));

        let unknown = vec![PlanStep::new("a", "a").depends_on("zzz")];
        assert!(dependency_order(&unknown).unwrap_err().contains("unknown"));

        let dup = vec![PlanStep::new("a", "a"), PlanStep::new("a", "again")];
        assert!(dependency_order(&dup).unwrap_err().contains("duplicate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_recovers_after_two_network_failures() {
        let executor = Scripted::default().fail(
            "s2",
            vec![
                DependencyError::Network("connection reset".into()),
                DependencyError::Network("connection reset".into()),
            ],
        );
        let (system, executor) = system(executor, ExecutionConfig::default());
        let plan = plan(vec![
            PlanStep::new("s1", "one"),
            PlanStep::new("s2", "two").depends_on("s1"),
            PlanStep::new("s3", "three").depends_on("s2"),
        ]);

        let outcome = system.execute(&plan).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.metrics.steps_completed, 3);
        assert_eq!(outcome.metrics.steps_attempted, 3);
        assert_eq!(outcome.metrics.retries, 2);
        assert_eq!(executor.calls.lock().len(), 5);
        assert_eq!(outcome.data["s3"]["step"], "s3");

        let retry_lines: Vec<_> = outcome
            .logs
            .iter()
            .filter(|l| l.message.contains("retrying in"))
            .collect();
        assert_eq!(retry_lines.len(), 2);
        assert!(retry_lines
            .iter()
            .all(|l| l.step_id.as_deref() == Some("s2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_step_stops_and_keeps_partial_outcome() {
        let executor = Scripted::default().fail(
            "s2",
            vec![DependencyError::Unauthorized("bad token".into())],
        );
        let (system, executor) = system(executor, ExecutionConfig::default());
        let plan = plan(vec![
            PlanStep::new("s1", "one"),
            PlanStep::new("s2", "two"),
            PlanStep::new("s3", "three"),
        ]);

        let err = system.execute(&plan).await.unwrap_err();
        match &err.kind {
            ExecutionErrorKind::StepFailed {
                step_id, category, ..
            } => {
                assert_eq!(step_id, "s2");
                assert_eq!(*category, ErrorCategory::Authentication);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!err.outcome.success);
        assert_eq!(err.outcome.metrics.steps_completed, 1);
        assert_eq!(err.outcome.metrics.steps_failed, 1);
        assert_eq!(*executor.calls.lock(), vec!["s1", "s2"]);
        assert!(err.outcome.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_preserves_progress() {
        let executor = Scripted {
            delay: Duration::from_secs(4),
            ..Default::default()
        };
        let config = ExecutionConfig {
            timeout_secs: 10,
            ..Default::default()
        };
        let (system, _) = system(executor, config);
        let plan = plan(vec![
            PlanStep::new("s1", "one"),
            PlanStep::new("s2", "two"),
            PlanStep::new("s3", "three"),
        ]);

        let err = system.execute(&plan).await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Timeout { after_ms: 10_000 });
        assert!(!err.outcome.success);
        assert_eq!(err.outcome.metrics.steps_completed, 2);
        assert_eq!(err.outcome.metrics.steps_attempted, 3);
        assert_eq!(err.outcome.metrics.steps_failed, 1);

        let last = err.outcome.logs.last().unwrap();
        assert!(last.message.contains("timed out"));
        assert_eq!(last.step_id.as_deref(), Some("s3"));
    }

    /// Replies in order: fail, hang past the plan deadline, then succeed
    struct FlakyThenHung {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl StepExecutor for FlakyThenHung {
        async fn execute_step(&self, _: &PlanStep, _: &str) -> Result<Value, DependencyError> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            match call {
                1 => Err(DependencyError::Unavailable("503".into())),
                2 => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Value::Null)
                }
                _ => Ok(json!("recovered")),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_cut_off_by_deadline_does_not_wedge_breaker() {
        let executor = Arc::new(FlakyThenHung {
            calls: Mutex::new(0),
        });
        // Zero cooldown: the next call after opening is always the probe
        let guard = Arc::new(DependencyGuard::new(
            &BreakerConfig {
                failure_threshold: 1,
                cooldown_ms: 0,
            },
            &RateLimitConfig::default(),
        ));
        let mut config = ExecutionConfig {
            timeout_secs: 1,
            ..Default::default()
        };
        config.retry.overrides.insert(
            "service".into(),
            crate::config::RetryOverride {
                max_attempts: Some(1),
                base_delay_ms: None,
            },
        );
        let system = ExecutionSystem::new(
            Arc::clone(&executor) as Arc<dyn StepExecutor>,
            Arc::clone(&guard),
            config,
        );
        let dependency = system.config.default_dependency.clone();
        let plan = plan(vec![PlanStep::new("s1", "one")]);

        let err = system.execute(&plan).await.unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::StepFailed { .. }));
        assert_eq!(guard.breaker_state(&dependency), BreakerState::Open);

        let err = system.execute(&plan).await.unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::Timeout { after_ms: 1_000 });
        assert_eq!(guard.breaker_state(&dependency), BreakerState::Open);

        let outcome = system.execute(&plan).await.unwrap();
        assert!(outcome.success);
        assert_eq!(*executor.calls.lock(), 3);
        assert_eq!(guard.breaker_state(&dependency), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_plan_runs_nothing() {
        let (system, executor) = system(Scripted::default(), ExecutionConfig::default());
        let plan = plan(vec![PlanStep::new("a", "a").depends_on("a")]);
        let err = system.execute(&plan).await.unwrap_err();
        assert!(matches!(err.kind, ExecutionErrorKind::InvalidPlan { .. }));
        assert!(executor.calls.lock().is_empty());
    }
}

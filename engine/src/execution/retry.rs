//! Retrying one action
//!
//! Runs a single action of a step through the dependency guard with a
//! per-attempt timeout. Failures are classified once; the category decides
//! whether to retry, how many attempts are allowed and the backoff base.
//! An open circuit ends the action immediately so the caller can move on to
//! the next fallback.

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use weave_sdk::errors::DependencyError;
use weave_sdk::interfaces::StepExecutor;
use weave_sdk::types::{LogLevel, PlanStep};

use super::outcome::SharedRecorder;
use crate::config::RetryConfig;
use crate::events::{EventBus, LoopEvent};
use crate::resilience::{classify, Backoff, ClassifiedError, DependencyGuard, ErrorCategory, Rejection};

/// Why an action gave up
#[derive(Debug, Clone, PartialEq)]
pub struct ActionFailure {
    pub error: ClassifiedError,
    /// Calls actually made to the executor
    pub attempts: u32,
    /// The guard refused the call outright
    pub circuit_open: bool,
}

/// Everything needed to run actions for one plan execution
pub struct ActionRunner<'a> {
    pub executor: &'a dyn StepExecutor,
    pub guard: &'a DependencyGuard,
    pub retry: &'a RetryConfig,
    pub step_timeout: Duration,
    pub events: Option<&'a EventBus>,
    pub recorder: &'a SharedRecorder,
    pub task_id: &'a str,
}

impl ActionRunner<'_> {
    /// Run `action` for `step` against `dependency` until it succeeds or the
    /// retry budget for its failure category is spent
    pub async fn run(
        &self,
        step: &PlanStep,
        action: &str,
        dependency: &str,
    ) -> Result<Value, ActionFailure> {
        let mut attempt: u32 = 0;
        let mut calls: u32 = 0;

        loop {
            attempt += 1;

            let failure = match self.guard.acquire(dependency) {
                Err(rejection) => {
                    let message = rejection.to_string();
                    match rejection {
                        Rejection::CircuitOpen { .. } => {
                            self.log(
                                LogLevel::Warn,
                                step,
                                format!("Circuit open, skipping action '{}': {}", action, message),
                            );
                            return Err(ActionFailure {
                                error: ClassifiedError {
                                    category: ErrorCategory::Service,
                                    message,
                                    retry_after: None,
                                },
                                attempts: calls,
                                circuit_open: true,
                            });
                        }
                        Rejection::RateLimited { retry_after, .. } => ClassifiedError {
                            category: ErrorCategory::RateLimit,
                            message,
                            retry_after: Some(retry_after),
                        },
                    }
                }
                Ok(permit) => {
                    calls += 1;
                    // Cancelling this future drops `permit` unsettled, which
                    // frees a half-open probe slot.
                    let result =
                        tokio::time::timeout(self.step_timeout, self.executor.execute_step(step, action))
                            .await;
                    let classified = match result {
                        Ok(Ok(value)) => {
                            permit.succeeded();
                            return Ok(value);
                        }
                        Ok(Err(e)) => classify(&e),
                        Err(_) => classify(&DependencyError::Timeout(format!(
                            "step timed out after {}ms",
                            self.step_timeout.as_millis()
                        ))),
                    };
                    permit.failed(classified.category);
                    classified
                }
            };

            let profile = self.retry.profile(failure.category);
            if !profile.retryable || attempt >= profile.max_attempts {
                self.log(
                    LogLevel::Warn,
                    step,
                    format!(
                        "Action '{}' failed after {} attempt(s): {}",
                        action, attempt, failure
                    ),
                );
                return Err(ActionFailure {
                    error: failure,
                    attempts: calls,
                    circuit_open: false,
                });
            }

            let base = match (failure.category, failure.retry_after) {
                (ErrorCategory::RateLimit, Some(hint)) => hint,
                _ => profile.base_delay,
            };
            let delay = Backoff::new(base, self.retry.max_delay(), self.retry.jitter).delay(attempt);
            let delay_ms = delay.as_millis() as u64;

            self.recorder.lock().retry_scheduled();
            self.log(
                LogLevel::Warn,
                step,
                format!(
                    "Attempt {}/{} failed {}; retrying in {}ms",
                    attempt, profile.max_attempts, failure, delay_ms
                ),
            );
            if let Some(events) = self.events {
                events.publish(LoopEvent::RetryScheduled {
                    task_id: Some(self.task_id.to_string()),
                    step_id: step.id.clone(),
                    attempt,
                    delay_ms,
                    category: failure.category,
                    at: Utc::now(),
                });
            }

            tokio::time::sleep(delay).await;
        }
    }

    pub fn log(&self, level: LogLevel, step: &PlanStep, message: String) {
        self.recorder.lock().log(level, Some(&step.id), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, RateLimitConfig};
    use crate::execution::outcome::OutcomeRecorder;
    use crate::resilience::BreakerState;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays scripted results, then succeeds
    struct Scripted {
        results: Mutex<VecDeque<Result<Value, DependencyError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(results: Vec<Result<Value, DependencyError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl StepExecutor for Scripted {
        async fn execute_step(&self, _step: &PlanStep, _action: &str) -> Result<Value, DependencyError> {
            *self.calls.lock() += 1;
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(json!("done")))
        }
    }

    fn guard(threshold: u32) -> DependencyGuard {
        DependencyGuard::new(
            &BreakerConfig {
                failure_threshold: threshold,
                cooldown_ms: 60_000,
            },
            &RateLimitConfig::default(),
        )
    }

    fn runner<'a>(
        executor: &'a Scripted,
        guard: &'a DependencyGuard,
        retry: &'a RetryConfig,
        recorder: &'a SharedRecorder,
        events: Option<&'a EventBus>,
    ) -> ActionRunner<'a> {
        ActionRunner {
            executor,
            guard,
            retry,
            step_timeout: Duration::from_secs(5),
            events,
            recorder,
            task_id: "task-1",
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_network_until_success() {
        let executor = Scripted::new(vec![
            Err(DependencyError::Network("reset".into())),
            Err(DependencyError::Network("reset".into())),
        ]);
        let guard = guard(5);
        let retry = RetryConfig::default();
        let recorder = OutcomeRecorder::shared();
        let bus = EventBus::new();
        let mut rx = bus.subscribe(crate::events::EventKind::RetryScheduled);

        let step = PlanStep::new("s1", "fetch");
        let value = runner(&executor, &guard, &retry, &recorder, Some(&bus))
            .run(&step, "fetch", "api")
            .await
            .unwrap();

        assert_eq!(value, json!("done"));
        assert_eq!(*executor.calls.lock(), 3);
        assert_eq!(recorder.lock().metrics().retries, 2);

        let mut delays = Vec::new();
        while let Ok(LoopEvent::RetryScheduled { delay_ms, attempt, .. }) = rx.try_recv() {
            delays.push((attempt, delay_ms));
        }
        assert_eq!(delays.len(), 2);
        assert!((750..=1000).contains(&delays[0].1));
        assert!((1500..=2000).contains(&delays[1].1));
        assert_eq!(guard.breaker_state("api"), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_fails_immediately() {
        let executor = Scripted::new(vec![Err(DependencyError::Invalid("bad input".into()))]);
        let guard = guard(5);
        let retry = RetryConfig::default();
        let recorder = OutcomeRecorder::shared();

        let step = PlanStep::new("s1", "validate");
        let failure = runner(&executor, &guard, &retry, &recorder, None)
            .run(&step, "validate", "api")
            .await
            .unwrap_err();

        assert_eq!(failure.error.category, ErrorCategory::Validation);
        assert_eq!(failure.attempts, 1);
        assert!(!failure.circuit_open);
        assert_eq!(recorder.lock().metrics().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_call() {
        let executor = Scripted::new(vec![
            Err(DependencyError::Unavailable("503".into())),
            Err(DependencyError::Unavailable("503".into())),
        ]);
        let guard = guard(2);
        let mut retry = RetryConfig::default();
        retry.overrides.insert(
            "service".into(),
            crate::config::RetryOverride {
                max_attempts: Some(5),
                base_delay_ms: Some(10),
            },
        );
        let recorder = OutcomeRecorder::shared();

        let step = PlanStep::new("s1", "call");
        let failure = runner(&executor, &guard, &retry, &recorder, None)
            .run(&step, "call", "api")
            .await
            .unwrap_err();

        // Two real calls trip the breaker; the third attempt is refused
        assert!(failure.circuit_open);
        assert_eq!(failure.attempts, 2);
        assert_eq!(*executor.calls.lock(), 2);
        assert_eq!(guard.breaker_state("api"), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        struct Hangs;

        #[async_trait]
        impl StepExecutor for Hangs {
            async fn execute_step(&self, _: &PlanStep, _: &str) -> Result<Value, DependencyError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }
        }

        let guard = guard(5);
        let retry = RetryConfig::default();
        let recorder = OutcomeRecorder::shared();
        let step = PlanStep::new("s1", "slow");
        let runner = ActionRunner {
            executor: &Hangs,
            guard: &guard,
            retry: &retry,
            step_timeout: Duration::from_millis(100),
            events: None,
            recorder: &recorder,
            task_id: "t",
        };

        let failure = runner.run(&step, "slow", "api").await.unwrap_err();
        assert_eq!(failure.error.category, ErrorCategory::Transient);
        assert_eq!(failure.attempts, 3);
    }
}

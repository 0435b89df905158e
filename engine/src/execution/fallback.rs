//! Per-step fallback chain
//!
//! A step's primary action is tried first, then each fallback in priority
//! order (lowest value first, plan order among equals). The first success
//! wins. If every action fails and the step carries a degradation value,
//! that value becomes the step's result and no error escapes.

use serde::Serialize;
use serde_json::Value;
use weave_sdk::types::{LogLevel, PlanStep};

use super::retry::{ActionFailure, ActionRunner};
use crate::resilience::{ClassifiedError, ErrorCategory};

/// How a step ended up succeeding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "via", content = "action", rename_all = "snake_case")]
pub enum Resolution {
    Primary,
    Fallback(String),
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSuccess {
    pub value: Value,
    pub resolution: Resolution,
}

/// Actions to try for `step`, in order
pub fn action_chain(step: &PlanStep) -> Vec<&str> {
    let mut fallbacks: Vec<_> = step.fallbacks.iter().collect();
    fallbacks.sort_by_key(|f| f.priority);
    std::iter::once(step.action.as_str())
        .chain(fallbacks.into_iter().map(|f| f.action.as_str()))
        .collect()
}

/// Run the chain for `step`
pub async fn run_chain(
    runner: &ActionRunner<'_>,
    step: &PlanStep,
    dependency: &str,
) -> Result<StepSuccess, ActionFailure> {
    let mut last_failure = None;

    for (i, action) in action_chain(step).into_iter().enumerate() {
        if i > 0 {
            runner.recorder.lock().fallback_used();
            runner.log(
                LogLevel::Info,
                step,
                format!("Falling back to '{}'", action),
            );
        }

        match runner.run(step, action, dependency).await {
            Ok(value) => {
                let resolution = if i == 0 {
                    Resolution::Primary
                } else {
                    runner.log(
                        LogLevel::Info,
                        step,
                        format!("Recovered via fallback '{}'", action),
                    );
                    Resolution::Fallback(action.to_string())
                };
                return Ok(StepSuccess { value, resolution });
            }
            Err(failure) => last_failure = Some(failure),
        }
    }

    if let Some(value) = &step.degradation {
        runner.log(
            LogLevel::Warn,
            step,
            "All actions failed; degraded to configured value".to_string(),
        );
        return Ok(StepSuccess {
            value: value.clone(),
            resolution: Resolution::Degraded,
        });
    }

    // The chain always holds the primary action, so a failure was recorded
    Err(last_failure.unwrap_or_else(|| ActionFailure {
        error: ClassifiedError {
            category: ErrorCategory::Unknown,
            message: format!("step '{}' has no actions", step.id),
            retry_after: None,
        },
        attempts: 0,
        circuit_open: false,
    }))
}

//! Outcome accumulation
//!
//! The recorder collects logs, counters and per-step results while a plan
//! runs. It lives behind a shared lock so that when the overall timeout
//! cancels execution, whatever was recorded up to that point is still there
//! to build the failed [`Outcome`].

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use weave_sdk::types::{LogEntry, LogLevel, Outcome, OutcomeMetrics};

pub type SharedRecorder = Arc<Mutex<OutcomeRecorder>>;

#[derive(Debug)]
pub struct OutcomeRecorder {
    started: Instant,
    metrics: OutcomeMetrics,
    logs: Vec<LogEntry>,
    results: Map<String, Value>,
    /// Step started but not yet completed or failed
    running: Option<String>,
}

impl Default for OutcomeRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            metrics: OutcomeMetrics::default(),
            logs: Vec::new(),
            results: Map::new(),
            running: None,
        }
    }

    pub fn shared() -> SharedRecorder {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Append a log line and mirror it to tracing
    pub fn log(&mut self, level: LogLevel, step_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        let step = step_id.unwrap_or("-");
        match level {
            LogLevel::Debug => debug!(step_id = step, "{}", message),
            LogLevel::Info => info!(step_id = step, "{}", message),
            LogLevel::Warn => warn!(step_id = step, "{}", message),
            LogLevel::Error => error!(step_id = step, "{}", message),
        }
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            step_id: step_id.map(str::to_string),
            message,
        });
    }

    pub fn step_started(&mut self, step_id: &str) {
        self.metrics.steps_attempted += 1;
        self.running = Some(step_id.to_string());
    }

    pub fn step_completed(&mut self, step_id: &str, value: Value) {
        self.metrics.steps_completed += 1;
        self.results.insert(step_id.to_string(), value);
        self.running = None;
    }

    pub fn step_failed(&mut self) {
        self.metrics.steps_failed += 1;
        self.running = None;
    }

    pub fn running_step(&self) -> Option<&str> {
        self.running.as_deref()
    }

    /// Fail whichever step was cut off mid-run; returns its id
    pub fn interrupt(&mut self) -> Option<String> {
        let step_id = self.running.take()?;
        self.metrics.steps_failed += 1;
        Some(step_id)
    }

    pub fn retry_scheduled(&mut self) {
        self.metrics.retries += 1;
    }

    pub fn fallback_used(&mut self) {
        self.metrics.fallbacks_used += 1;
    }

    pub fn metrics(&self) -> &OutcomeMetrics {
        &self.metrics
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Freeze into an outcome; `data` holds each completed step's result
    pub fn finish(&self, success: bool, error: Option<String>) -> Outcome {
        let mut metrics = self.metrics.clone();
        metrics.log_entries = u32::try_from(self.logs.len()).unwrap_or(u32::MAX);
        Outcome {
            success,
            data: Value::Object(self.results.clone()),
            duration_ms: self.started.elapsed().as_millis() as u64,
            metrics,
            logs: self.logs.clone(),
            error,
        }
    }
}

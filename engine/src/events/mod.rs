//! Event bus for loop progress
//!
//! The EventBus provides a pub/sub channel for monitoring the loop without
//! coupling stages to any particular sink. Every stage transition, retry and
//! breaker state change is published here and mirrored as a `tracing` event.
//!
//! Subscribers receive bounded channels. Publishing never blocks: if a
//! subscriber's channel is full the event is dropped for that subscriber, and
//! subscribers whose receiver was dropped are pruned.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::orchestrator::state::{LoopState, Stage};
use crate::resilience::{BreakerState, ErrorCategory};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Event kinds that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    StageTransition,
    RetryScheduled,
    BreakerStateChanged,
    TaskCompleted,
    TaskFailed,
    /// Subscribe to every kind
    All,
}

/// Events published on the bus
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    StageTransition {
        task_id: String,
        from: LoopState,
        to: LoopState,
        at: DateTime<Utc>,
    },
    RetryScheduled {
        task_id: Option<String>,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
        category: ErrorCategory,
        at: DateTime<Utc>,
    },
    BreakerStateChanged {
        dependency: String,
        from: BreakerState,
        to: BreakerState,
        at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: String,
        success: bool,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: String,
        stage: Stage,
        error: String,
        at: DateTime<Utc>,
    },
}

impl LoopEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LoopEvent::StageTransition { .. } => EventKind::StageTransition,
            LoopEvent::RetryScheduled { .. } => EventKind::RetryScheduled,
            LoopEvent::BreakerStateChanged { .. } => EventKind::BreakerStateChanged,
            LoopEvent::TaskCompleted { .. } => EventKind::TaskCompleted,
            LoopEvent::TaskFailed { .. } => EventKind::TaskFailed,
        }
    }

    fn trace(&self) {
        match self {
            LoopEvent::StageTransition {
                task_id, from, to, ..
            } => debug!(task_id = %task_id, from = %from, to = %to, "stage transition"),
            LoopEvent::RetryScheduled {
                step_id,
                attempt,
                delay_ms,
                category,
                ..
            } => debug!(
                step_id = %step_id,
                attempt,
                delay_ms,
                category = %category,
                "retry scheduled"
            ),
            LoopEvent::BreakerStateChanged {
                dependency,
                from,
                to,
                ..
            } => info!(dependency = %dependency, from = %from, to = %to, "breaker state changed"),
            LoopEvent::TaskCompleted {
                task_id,
                success,
                duration_ms,
                ..
            } => info!(task_id = %task_id, success, duration_ms, "task completed"),
            LoopEvent::TaskFailed {
                task_id,
                stage,
                error,
                ..
            } => warn!(task_id = %task_id, stage = %stage, error = %error, "task failed"),
        }
    }
}

/// Pub/sub bus for loop events
pub struct EventBus {
    channels: Mutex<HashMap<EventKind, Vec<mpsc::Sender<LoopEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to one event kind, or [`EventKind::All`]
    pub fn subscribe(&self, kind: EventKind) -> mpsc::Receiver<LoopEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        self.channels.lock().entry(kind).or_default().push(tx);
        rx
    }

    /// Publish an event to matching subscribers without waiting
    pub fn publish(&self, event: LoopEvent) {
        event.trace();

        let mut channels = self.channels.lock();
        for kind in [event.kind(), EventKind::All] {
            if let Some(subscribers) = channels.get_mut(&kind) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => true,
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.channels.lock().values().map(Vec::len).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

//! Collaborator traits
//!
//! The loop owns planning, failure policy and bookkeeping. Everything that
//! touches the outside world is injected through one of these traits:
//!
//! - [`ContextSource`]: a knowledge provider queried during perception
//! - [`StepExecutor`]: performs the raw action of a plan step
//! - [`MemoryStore`]: append-only persistence with pattern search
//!
//! Implementations only perform the raw operation and report typed errors.
//! Retries, circuit breaking and fallbacks are applied by the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{DependencyError, StoreError};
use crate::types::{PlanStep, SourceKind, SourceResult, Task};

/// A knowledge provider consulted during perception
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Unique name, used for weighting and reporting
    fn name(&self) -> &str;

    /// Which context bucket this source fills
    fn kind(&self) -> SourceKind;

    /// Gather at most `limit` items relevant to `task`
    async fn gather(&self, task: &Task, limit: usize) -> Result<SourceResult, DependencyError>;
}

/// Performs the raw action of a plan step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute `action` on behalf of `step`
    ///
    /// `action` is either the step's primary action or one of its fallbacks.
    async fn execute_step(
        &self,
        step: &PlanStep,
        action: &str,
    ) -> Result<serde_json::Value, DependencyError>;
}

/// A stored record as returned by [`MemoryStore::search`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub key: String,
    pub namespace: String,
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Backend-specific match score, higher is better
    #[serde(default)]
    pub score: f64,
}

impl MemoryRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

/// Append-only persistence with approximate search
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist `value` under `key`; an existing key is an error
    async fn store(
        &self,
        key: &str,
        value: serde_json::Value,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Records in `namespace` matching `pattern`, best first
    async fn search(
        &self,
        pattern: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Most recently stored records in `namespace`
    async fn recent(&self, namespace: &str, limit: usize) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Delete records whose TTL has passed; returns how many were removed
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Flatten every string in a JSON value into one searchable text blob
pub fn searchable_text(value: &serde_json::Value) -> String {
    fn walk(value: &serde_json::Value, out: &mut Vec<String>) {
        match value {
            serde_json::Value::String(s) => out.push(s.clone()),
            serde_json::Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            serde_json::Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            _ => {}
        }
    }

    let mut parts = Vec::new();
    walk(value, &mut parts);
    parts.join(" ")
}

//! Perception stage
//!
//! Fans a task out to every registered [`ContextSource`] concurrently, waits
//! for all of them to settle, and fuses whatever came back into one immutable
//! [`Context`].
//!
//! Sources degrade rather than fail: a source that errors or exceeds its
//! timeout contributes nothing and lowers the confidence score. Only when
//! every registered source fails does perception itself fail.
//!
//! Fusion is deterministic. Items are bucketed by source kind and each bucket
//! is sorted by relevance, then source name, then item id, so completion order
//! never changes the resulting context.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use weave_sdk::interfaces::ContextSource;
use weave_sdk::types::{Context, ContextItem, SourceKind, Task};

use crate::config::PerceptionConfig;

pub mod sources;

pub use sources::{ExperienceSource, StaticSource};

#[derive(Debug, Clone, Error)]
pub enum PerceptionError {
    #[error("All {} context sources failed", failures.len())]
    AllSourcesFailed { failures: Vec<SourceReport> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    Failed { error: String },
    TimedOut,
}

/// How one source fared
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub kind: SourceKind,
    #[serde(flatten)]
    pub status: SourceStatus,
    pub items: usize,
    /// This source's contribution to confidence, `[0, 1]`
    pub score: f64,
    pub elapsed_ms: u64,
}

/// Output of the perception stage
#[derive(Debug, Clone)]
pub struct Perception {
    pub context: Context,
    pub confidence: f64,
    pub sources: Vec<SourceReport>,
}

impl Perception {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| !matches!(s.status, SourceStatus::Ok))
    }
}

pub struct PerceptionSystem {
    sources: Vec<Arc<dyn ContextSource>>,
    config: PerceptionConfig,
}

impl PerceptionSystem {
    pub fn new(config: PerceptionConfig) -> Self {
        Self {
            sources: Vec::new(),
            config,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.add_source(source);
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn ContextSource>) {
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Gather and fuse context for `task`
    pub async fn perceive(&self, task: &Task) -> Result<Perception, PerceptionError> {
        let limit = self.config.max_items_per_source.max(1);
        let timeout = self.config.source_timeout();

        if self.sources.is_empty() {
            warn!(task_id = %task.id, "No context sources registered; context is empty");
            let context = Context::empty(task.clone());
            return Ok(Perception {
                context,
                confidence: 0.0,
                sources: Vec::new(),
            });
        }

        let gathers = self.sources.iter().map(|source| async move {
            let start = Instant::now();
            let result = tokio::time::timeout(timeout, source.gather(task, limit)).await;
            (source, result, start.elapsed())
        });
        let settled = join_all(gathers).await;

        let mut reports = Vec::with_capacity(settled.len());
        let mut collected: Vec<(SourceKind, ContextItem)> = Vec::new();
        let mut weighted = 0.0;
        let mut total_weight = 0.0;

        for (source, result, elapsed) in settled {
            let name = source.name().to_string();
            let weight = self.config.weight_for(&name);
            total_weight += weight;

            let (status, kind, items) = match result {
                Ok(Ok(mut gathered)) => {
                    gathered.items.sort_by(item_order);
                    gathered.items.truncate(limit);
                    (SourceStatus::Ok, gathered.kind, gathered.items)
                }
                Ok(Err(e)) => {
                    warn!(source = %name, "Context source failed: {}", e);
                    (
                        SourceStatus::Failed {
                            error: e.to_string(),
                        },
                        source.kind(),
                        Vec::new(),
                    )
                }
                Err(_) => {
                    warn!(source = %name, "Context source timed out after {:?}", timeout);
                    (SourceStatus::TimedOut, source.kind(), Vec::new())
                }
            };

            let score = source_score(&items, limit);
            weighted += weight * score;

            debug!(
                source = %name,
                items = items.len(),
                score,
                "Context source settled in {:?}",
                elapsed
            );

            reports.push(SourceReport {
                name: name.clone(),
                kind,
                status,
                items: items.len(),
                score,
                elapsed_ms: elapsed.as_millis() as u64,
            });

            collected.extend(items.into_iter().map(|mut item| {
                item.source = name.clone();
                item.kind = kind;
                item.relevance = item.relevance.clamp(0.0, 1.0);
                (kind, item)
            }));
        }

        if reports
            .iter()
            .all(|r| !matches!(r.status, SourceStatus::Ok))
        {
            return Err(PerceptionError::AllSourcesFailed { failures: reports });
        }

        let confidence = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let context = fuse(task, collected, confidence);
        info!(
            task_id = %task.id,
            items = context.item_count(),
            confidence,
            "Perception complete"
        );

        Ok(Perception {
            context,
            confidence,
            sources: reports,
        })
    }
}

/// Confidence contribution of one source
///
/// Half for returning anything at all, a quarter for how full the result is
/// relative to the limit, and a quarter for mean item relevance.
pub fn source_score(items: &[ContextItem], limit: usize) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let n = items.len();
    let fill = n.min(limit) as f64 / limit.max(1) as f64;
    let mean_relevance = items.iter().map(|i| i.relevance).sum::<f64>() / n as f64;
    0.5 + 0.25 * fill + 0.25 * mean_relevance.clamp(0.0, 1.0)
}

fn item_order(a: &ContextItem, b: &ContextItem) -> Ordering {
    b.relevance
        .total_cmp(&a.relevance)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| a.title.cmp(&b.title))
}

fn fuse(task: &Task, items: Vec<(SourceKind, ContextItem)>, confidence: f64) -> Context {
    let mut context = Context::empty(task.clone());
    for (kind, item) in items {
        match kind {
            SourceKind::Experience => context.past_experiences.push(item),
            SourceKind::Note => context.related_notes.push(item),
            SourceKind::External => context.external_knowledge.push(item),
        }
    }
    context.past_experiences.sort_by(item_order);
    context.related_notes.sort_by(item_order);
    context.external_knowledge.sort_by(item_order);
    context.confidence = confidence;
    context.timestamp = Utc::now();
    context
}

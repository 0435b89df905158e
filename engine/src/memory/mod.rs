//! Long-term memory
//!
//! The `MemorySystem` persists each completed [`Experience`] through an
//! injected [`MemoryStore`] and serves approximate queries back to perception,
//! closing the loop's feedback edge. Storage is append-only; experiences are
//! optionally compressed before being written and expire after the configured
//! retention period.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use weave_sdk::errors::{StoreError, WeaveErrorExt};
use weave_sdk::interfaces::{MemoryRecord, MemoryStore};
use weave_sdk::types::Experience;

use crate::config::MemoryConfig;
use crate::similarity;

pub mod compression;
pub mod store;

pub use compression::compress;
pub use store::InMemoryStore;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to encode experience {id}: {message}")]
    Encode { id: String, message: String },
}

impl WeaveErrorExt for MemoryError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Store(e) => e.user_hint(),
            Self::Encode { .. } => "The experience could not be serialized",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Encode { .. } => false,
        }
    }
}

/// Restrictions applied to a memory query
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub domain: Option<String>,
    pub success: Option<bool>,
    /// Maximum results; 0 means the configured query limit
    pub limit: usize,
}

impl QueryFilters {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn successful(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    fn accepts(&self, experience: &Experience) -> bool {
        self.domain
            .as_ref()
            .map_or(true, |d| experience.domain.eq_ignore_ascii_case(d))
            && self.success.map_or(true, |s| experience.success == s)
    }
}

/// A query hit with its relevance to the query pattern
#[derive(Debug, Clone, Serialize)]
pub struct ScoredExperience {
    pub experience: Experience,
    pub relevance: f64,
}

pub struct MemorySystem {
    store: Arc<dyn MemoryStore>,
    config: MemoryConfig,
}

impl MemorySystem {
    pub fn new(store: Arc<dyn MemoryStore>, config: MemoryConfig) -> Self {
        Self { store, config }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Persist an experience, compressing it first when configured
    ///
    /// Returns the experience exactly as stored.
    pub async fn store(&self, experience: &Experience) -> Result<Experience, MemoryError> {
        let stored = if self.config.compress {
            compress(experience.clone())
        } else {
            experience.clone()
        };

        let value = serde_json::to_value(&stored).map_err(|e| MemoryError::Encode {
            id: stored.id.clone(),
            message: e.to_string(),
        })?;

        self.store
            .store(
                &stored.id,
                value,
                &self.config.namespace,
                self.config.retention(),
            )
            .await?;

        info!(
            experience_id = %stored.id,
            domain = %stored.domain,
            success = stored.success,
            compressed = stored.compressed,
            "Stored experience"
        );
        Ok(stored)
    }

    /// Experiences relevant to `pattern`, best first
    ///
    /// Over-fetches from the store, drops records that fail to decode or do
    /// not pass `filters`, and re-ranks by token relevance so every backend
    /// orders results the same way.
    pub async fn query(
        &self,
        pattern: &str,
        filters: &QueryFilters,
    ) -> Result<Vec<ScoredExperience>, MemoryError> {
        let limit = match filters.limit {
            0 => self.config.query_limit,
            n => n,
        };
        let fetch = (limit * 4).max(20);
        let records = self
            .store
            .search(pattern, &self.config.namespace, fetch)
            .await?;

        let mut hits: Vec<ScoredExperience> = decode_all(records)
            .into_iter()
            .filter(|e| filters.accepts(e))
            .map(|experience| ScoredExperience {
                relevance: similarity::relevance(pattern, &experience.summary_text()),
                experience,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then(b.experience.timestamp.cmp(&a.experience.timestamp))
                .then(a.experience.id.cmp(&b.experience.id))
        });
        hits.truncate(limit);

        debug!("Memory query '{}' returned {} experiences", pattern, hits.len());
        Ok(hits)
    }

    /// Most recently stored experiences, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<Experience>, MemoryError> {
        let records = self.store.recent(&self.config.namespace, limit).await?;
        Ok(decode_all(records))
    }

    /// Delete experiences past their retention period
    pub async fn evict_expired(&self) -> Result<u64, MemoryError> {
        let evicted = self.store.evict_expired(Utc::now()).await?;
        if evicted > 0 {
            info!("Evicted {} expired experiences", evicted);
        }
        Ok(evicted)
    }
}

fn decode_all(records: Vec<MemoryRecord>) -> Vec<Experience> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record.value) {
            Ok(experience) => Some(experience),
            Err(e) => {
                warn!("Skipping undecodable memory record {}: {}", record.key, e);
                None
            }
        })
        .collect()
}

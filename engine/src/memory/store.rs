//! In-process memory store
//!
//! A [`MemoryStore`] kept entirely in memory. Search ranks records by token
//! relevance against their searchable text. Used by tests and by the
//! `memory` backend setting for throwaway runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::RwLock;
use weave_sdk::errors::StoreError;
use weave_sdk::interfaces::{searchable_text, MemoryRecord, MemoryStore};

use crate::similarity;

struct Entry {
    record: MemoryRecord,
    text: String,
}

#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn store(
        &self,
        key: &str,
        value: serde_json::Value,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let expires_at = match ttl {
            Some(ttl) => Some(
                now + chrono::Duration::from_std(ttl)
                    .map_err(|e| StoreError::Backend(format!("Invalid TTL: {}", e)))?,
            ),
            None => None,
        };

        let mut entries = self.entries.write().await;
        if entries
            .iter()
            .any(|e| e.record.namespace == namespace && e.record.key == key)
        {
            return Err(StoreError::DuplicateKey(format!("{}/{}", namespace, key)));
        }

        let text = searchable_text(&value);
        entries.push(Entry {
            record: MemoryRecord {
                key: key.to_string(),
                namespace: namespace.to_string(),
                value,
                stored_at: now,
                expires_at,
                score: 0.0,
            },
            text,
        });
        Ok(())
    }

    async fn search(
        &self,
        pattern: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        if similarity::tokenize(pattern).is_empty() {
            return self.recent(namespace, limit).await;
        }

        let now = Utc::now();
        let entries = self.entries.read().await;
        let mut hits: Vec<(usize, MemoryRecord)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.record.namespace == namespace && !e.record.is_expired(now))
            .filter_map(|(i, e)| {
                let score = similarity::relevance(pattern, &e.text);
                (score > 0.0).then(|| {
                    let mut record = e.record.clone();
                    record.score = score;
                    (i, record)
                })
            })
            .collect();

        // Best match first; newer insertions win ties
        hits.sort_by(|(ia, a), (ib, b)| b.score.total_cmp(&a.score).then(ib.cmp(ia)));
        Ok(hits.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    async fn recent(&self, namespace: &str, limit: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        let now = Utc::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.record.namespace == namespace && !e.record.is_expired(now))
            .take(limit)
            .map(|e| e.record.clone())
            .collect())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !e.record.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

//! SQLite memory store
//!
//! Implements [`MemoryStore`] over the `memory_records` table. Search goes
//! through the FTS5 index and is ordered by bm25 rank; an empty pattern
//! returns the most recent records instead.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::debug;
use weave_sdk::errors::StoreError;
use weave_sdk::interfaces::{searchable_text, MemoryRecord, MemoryStore};

use crate::similarity::tokenize;

/// Repository for long-term memory records
pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Turn free text into an FTS5 query matching any of its tokens
///
/// Tokens are quoted so user text can never inject FTS operators.
fn fts_query(pattern: &str) -> Option<String> {
    let mut tokens: Vec<String> = tokenize(pattern).into_iter().collect();
    if tokens.is_empty() {
        return None;
    }
    tokens.sort();
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Backend(format!("Invalid stored timestamp: {}", ms)))
}

fn backend(context: &str) -> impl Fn(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Backend(format!("{}: {}", context, e))
}

fn row_to_record(row: &SqliteRow, score: f64) -> Result<MemoryRecord, StoreError> {
    let value: String = row.get("value");
    let expires_at: Option<i64> = row.get("expires_at");
    Ok(MemoryRecord {
        key: row.get("key"),
        namespace: row.get("namespace"),
        value: serde_json::from_str(&value)?,
        stored_at: from_millis(row.get("stored_at"))?,
        expires_at: expires_at.map(from_millis).transpose()?,
        score,
    })
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn store(
        &self,
        key: &str,
        value: serde_json::Value,
        namespace: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| StoreError::Backend(format!("Invalid TTL: {}", e)))?;
                Some(to_millis(now + ttl))
            }
            None => None,
        };
        let search_text = searchable_text(&value);
        let encoded = serde_json::to_string(&value)?;

        let result = sqlx::query(
            r#"
            INSERT INTO memory_records (namespace, key, value, search_text, stored_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (namespace, key) DO NOTHING
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(encoded)
        .bind(search_text)
        .bind(to_millis(now))
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to insert memory record"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey(format!("{}/{}", namespace, key)));
        }

        debug!("Stored memory record {}/{}", namespace, key);
        Ok(())
    }

    async fn search(
        &self,
        pattern: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let Some(query) = fts_query(pattern) else {
            return self.recent(namespace, limit).await;
        };

        let rows = sqlx::query(
            r#"
            SELECT r.key, r.namespace, r.value, r.stored_at, r.expires_at,
                   bm25(memory_records_fts) AS rank
            FROM memory_records_fts
            JOIN memory_records r ON r.id = memory_records_fts.rowid
            WHERE memory_records_fts MATCH ?
              AND r.namespace = ?
              AND (r.expires_at IS NULL OR r.expires_at > ?)
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(namespace)
        .bind(to_millis(Utc::now()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to execute FTS query on memory_records_fts"))?;

        rows.iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                // bm25 is lower-is-better and negative for matches
                row_to_record(row, -rank)
            })
            .collect()
    }

    async fn recent(&self, namespace: &str, limit: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT key, namespace, value, stored_at, expires_at
            FROM memory_records
            WHERE namespace = ?
              AND (expires_at IS NULL OR expires_at > ?)
            ORDER BY stored_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(namespace)
        .bind(to_millis(Utc::now()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend("Failed to list recent memory records"))?;

        rows.iter().map(|row| row_to_record(row, 0.0)).collect()
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM memory_records WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(backend("Failed to evict expired memory records"))?;

        if result.rows_affected() > 0 {
            debug!("Evicted {} expired memory records", result.rows_affected());
        }
        Ok(result.rows_affected())
    }
}

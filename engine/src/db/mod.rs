//! SQLite persistence for long-term memory
//!
//! One database file holds every namespace of experience records plus their
//! full-text index. The pool runs in WAL mode so a loop can append an
//! experience while another command searches; SQLite replays a leftover WAL
//! on its own when the file is reopened after a crash.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub mod memory;

pub use memory::SqliteMemoryStore;

const MIGRATIONS: &[(&str, &str)] = &[(
    "001_memory.sql",
    include_str!("../../migrations/001_memory.sql"),
)];

/// How long a writer waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Record counts for one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub records: u64,
    /// Past retention but not yet evicted
    pub expired: u64,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the memory database at `db_path` and apply migrations
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Opening memory database at {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to memory database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply every migration; each statement is `IF NOT EXISTS`
    async fn migrate(&self) -> Result<()> {
        for (name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to apply migration {}", name))?;
            debug!("Applied migration {}", name);
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// A memory store over this database
    pub fn memory_store(&self) -> SqliteMemoryStore {
        SqliteMemoryStore::new(self.pool.clone())
    }

    /// How many records `namespace` holds, and how many of those have expired
    pub async fn stats(&self, namespace: &str) -> Result<MemoryStats> {
        let now = chrono::Utc::now().timestamp_millis();
        let (records, expired): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN expires_at IS NOT NULL AND expires_at <= ? THEN 1 ELSE 0 END), 0)
            FROM memory_records
            WHERE namespace = ?
            "#,
        )
        .bind(now)
        .bind(namespace)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count memory records")?;

        Ok(MemoryStats {
            records: u64::try_from(records).unwrap_or(0),
            expired: u64::try_from(expired).unwrap_or(0),
        })
    }

    /// Move WAL contents into the main database file
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to checkpoint WAL")?;
        debug!("WAL checkpointed");
        Ok(())
    }

    /// Checkpoint and close every pooled connection
    pub async fn close(self) -> Result<()> {
        self.checkpoint().await?;
        self.pool.close().await;
        debug!("Memory database closed");
        Ok(())
    }
}

mod capsules;
mod codec;
mod export;
mod filters;
mod fts;
mod observations;
mod pins;
mod schema;
mod summaries;

pub use capsules::ClosedCapsule;
pub use export::{
    DATASET_VERSION, ExportDataset, ExportOptions, ImportCounts, ImportReport, ImportWarning,
};
pub use fts::{FullTextMatch, MatchFilter};
pub use observations::{EvidenceSnippet, EvidenceSource, ObservationQuery};
pub use schema::SCHEMA_VERSION;

use crate::error::Result;
use anyhow::Context;
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-backed store for observations, capsules, summaries and pins.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Row counts reported by [`SqliteStore::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub observations: u64,
    pub redacted_observations: u64,
    pub capsules: u64,
    pub open_capsules: u64,
    pub summaries: u64,
    pub pins: u64,
    pub schema_version: u32,
}

/// Rows re-indexed by [`SqliteStore::reindex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub observations: u64,
    pub summaries: u64,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("open SQLite database {}", path.display()))?;

        tracing::debug!(path = %path.display(), "memory database opened");
        Self::with_pool(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// Pinned to one connection that never expires: every new SQLite
    /// in-memory connection would otherwise see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("open in-memory SQLite")?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and run schema initialization.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        schema::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let (observations, redacted, capsules, open, summaries, pins): (i64, i64, i64, i64, i64, i64) =
            sqlx::query_as(
                "SELECT
                    (SELECT COUNT(*) FROM observations),
                    (SELECT COUNT(*) FROM observations WHERE redacted = 1),
                    (SELECT COUNT(*) FROM capsules),
                    (SELECT COUNT(*) FROM capsules WHERE status = 'open'),
                    (SELECT COUNT(*) FROM summaries),
                    (SELECT COUNT(*) FROM pins)",
            )
            .fetch_one(&self.pool)
            .await?;

        let count = |value: i64| u64::try_from(value).unwrap_or_default();
        Ok(StoreStats {
            observations: count(observations),
            redacted_observations: count(redacted),
            capsules: count(capsules),
            open_capsules: count(open),
            summaries: count(summaries),
            pins: count(pins),
            schema_version: schema::stored_schema_version(&self.pool).await?,
        })
    }

    /// Rebuild both full-text indexes from their base tables.
    pub async fn reindex(&self) -> Result<ReindexReport> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO observations_fts(observations_fts) VALUES ('delete-all')")
            .execute(&mut *tx)
            .await?;
        let observations = sqlx::query(
            "INSERT INTO observations_fts(rowid, content)
             SELECT row_id, content FROM observations
             WHERE redacted = 0 AND content IS NOT NULL",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("INSERT INTO summaries_fts(summaries_fts) VALUES ('delete-all')")
            .execute(&mut *tx)
            .await?;
        let summaries = sqlx::query(
            "INSERT INTO summaries_fts(rowid, content) SELECT row_id, content FROM summaries",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        tracing::info!(observations, summaries, "full-text indexes rebuilt");
        Ok(ReindexReport {
            observations,
            summaries,
        })
    }
}

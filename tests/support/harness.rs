#![allow(dead_code)]

use capsule_memory::SqliteStore;
use capsule_memory::model::{Observation, ObservationDraft, Scope, Timestamp};
use tempfile::TempDir;

/// Fixed clock for ranking and expiry assertions.
pub const NOW: Timestamp = 1_750_000_000_000;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub const HOSTILE_SESSION: &str = "' OR '1'='1";

pub async fn memory_store() -> SqliteStore {
    SqliteStore::in_memory().await.unwrap()
}

/// A store backed by a file in a fresh temp dir. Keep the `TempDir` alive.
pub async fn disk_store() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&tmp.path().join("memory.db")).await.unwrap();
    (tmp, store)
}

pub async fn observe(
    store: &SqliteStore,
    id: &str,
    content: &str,
    timestamp: Timestamp,
    scope: Scope,
) -> Observation {
    store
        .insert_observation(
            ObservationDraft::new("message", content)
                .with_id(id)
                .with_timestamp(timestamp)
                .with_scope(scope),
        )
        .await
        .unwrap()
}

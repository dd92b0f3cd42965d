use crate::harness::{DAY_MS, NOW, memory_store, observe};
use capsule_memory::model::Scope;
use capsule_memory::search::scoring::MAX_AGE_MS;
use capsule_memory::storage::SqliteStore;
use capsule_memory::{LocalSearchProvider, RetrievalOrchestrator, RetrievalRequest};
use std::sync::Arc;

const FILLER: [&str; 4] = [
    "refactored the config loader",
    "bumped the tokio version",
    "wrote release notes",
    "cleaned up stale branches",
];

async fn seeded(rows: &[(&str, &str, i64)]) -> SqliteStore {
    let store = memory_store().await;
    for (i, filler) in FILLER.iter().enumerate() {
        observe(&store, &format!("filler-{i}"), filler, NOW, Scope::session("s1")).await;
    }
    for (id, content, timestamp) in rows {
        observe(&store, id, content, *timestamp, Scope::session("s1")).await;
    }
    store
}

fn orchestrator(store: SqliteStore) -> RetrievalOrchestrator {
    let provider = LocalSearchProvider::new(store.clone()).with_now(NOW);
    RetrievalOrchestrator::new(store, Arc::new(provider)).with_now(NOW)
}

#[tokio::test]
async fn repeated_term_ranks_first() {
    let store = seeded(&[
        ("single", "the migration failed", NOW),
        ("triple", "migration migration migration", NOW),
    ])
    .await;
    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("migration", Scope::session("s1")))
        .await
        .unwrap();
    let ids: Vec<&str> = result.candidates.iter().map(|h| h.item.id()).collect();
    assert_eq!(ids, vec!["triple", "single"]);
    assert!(result.candidates[0].score > result.candidates[1].score);
}

#[tokio::test]
async fn recent_outranks_month_old_duplicate() {
    let store = seeded(&[
        ("old", "cache invalidation bug", NOW - MAX_AGE_MS - DAY_MS),
        ("new", "cache invalidation bug", NOW - DAY_MS),
    ])
    .await;
    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("invalidation", Scope::session("s1")))
        .await
        .unwrap();
    let ids: Vec<&str> = result.candidates.iter().map(|h| h.item.id()).collect();
    assert_eq!(ids, vec!["new", "old"]);
    // Equal relevance normalizes to 0.5 for both; the old row gets no recency.
    assert!((result.candidates[1].score - 0.35).abs() < 1e-9);
}

#[tokio::test]
async fn malformed_queries_yield_no_candidates() {
    let store = seeded(&[("a", "anything goes here", NOW)]).await;
    let orchestrator = orchestrator(store);
    for raw in ["", "   ", "\"unterminated", "(anything", "OR", "NOT", "*", "content:"] {
        let result = orchestrator
            .retrieve(&RetrievalRequest::new(raw, Scope::session("s1")))
            .await
            .unwrap();
        assert!(result.candidates.is_empty(), "query {raw:?} produced hits");
        assert_eq!(result.provenance.total_candidates, 0);
        assert!(!result.provenance.truncated);
    }
}

#[tokio::test]
async fn other_sessions_stay_invisible() {
    let store = seeded(&[("mine", "deploy pipeline", NOW)]).await;
    observe(&store, "theirs", "deploy pipeline", NOW, Scope::session("s2")).await;
    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("deploy", Scope::session("s1")))
        .await
        .unwrap();
    assert_eq!(result.item_ids(), vec!["mine"]);
    assert_eq!(result.provenance.provider, "local-fts");
}

#[tokio::test]
async fn candidate_cap_marks_truncation() {
    let store = seeded(&[
        ("a", "lint warning", NOW),
        ("b", "lint warning again", NOW - 1),
        ("c", "another lint warning", NOW - 2),
    ])
    .await;
    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("lint", Scope::session("s1")).with_max_candidates(2))
        .await
        .unwrap();
    assert_eq!(result.candidates.len(), 2);
    assert_eq!(result.provenance.total_candidates, 3);
    assert_eq!(result.provenance.returned_candidates, 2);
    assert!(result.provenance.truncated);
}

use crate::harness::{NOW, memory_store, observe};
use capsule_memory::model::{CapsuleDraft, CapsuleType, PinDraft, PinTargetType, Scope, SummaryDraft};
use capsule_memory::storage::SqliteStore;
use capsule_memory::{LocalSearchProvider, RetrievalOrchestrator, RetrievalRequest};
use std::sync::Arc;

fn orchestrator(store: SqliteStore) -> RetrievalOrchestrator {
    let provider = LocalSearchProvider::new(store.clone()).with_now(NOW);
    RetrievalOrchestrator::new(store, Arc::new(provider)).with_now(NOW)
}

async fn pin(store: &SqliteStore, target_type: PinTargetType, target_id: &str) {
    store
        .insert_pin(PinDraft {
            created_at: Some(NOW - 10),
            ..PinDraft::new(target_type, target_id)
        })
        .await
        .unwrap();
}

/// Candidates ordered by term frequency; token costs 5, 6 and 8.
async fn seed_candidates(store: &SqliteStore) {
    for (i, filler) in ["formatting pass", "dependency audit", "typo fixes", "ci cache tweak"]
        .iter()
        .enumerate()
    {
        observe(store, &format!("filler-{i}"), filler, NOW, Scope::session("s1")).await;
    }
    observe(store, "c1", "deploy deploy deploy", NOW, Scope::session("s1")).await;
    observe(store, "c2", "deploy deploy staging", NOW, Scope::session("s1")).await;
    observe(store, "c3", "deploy once to production hosts", NOW, Scope::session("s1")).await;
}

#[tokio::test]
async fn tier_zero_is_never_trimmed() {
    let store = memory_store().await;
    seed_candidates(&store).await;
    let long_note = "release checklist ".repeat(25);
    observe(&store, "pinned", &long_note, NOW - 100, Scope::session("s1")).await;
    pin(&store, PinTargetType::Observation, "pinned").await;

    let capsule = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "ship", Scope::session("s1")))
        .await
        .unwrap();
    store
        .insert_summary(SummaryDraft {
            created_at: Some(NOW - 50),
            ..SummaryDraft::new(&capsule.id, "halfway through the release checklist")
        })
        .await
        .unwrap();

    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("deploy", Scope::session("s1")).with_budget(20))
        .await
        .unwrap();

    assert_eq!(result.pins.len(), 1);
    assert_eq!(result.pins[0].target.content(), long_note);
    assert!(result.current_summary.is_some());
    assert!(result.candidates.is_empty());
    assert!(result.provenance.tier0_over_budget);
    assert!(result.provenance.truncated);
    assert_eq!(result.provenance.returned_candidates, 0);
}

#[tokio::test]
async fn candidates_fill_remaining_budget_in_score_order() {
    let store = memory_store().await;
    seed_candidates(&store).await;
    // 25 chars: 7 tokens.
    observe(&store, "pinned", "pinned note about release", NOW, Scope::session("s1")).await;
    pin(&store, PinTargetType::Observation, "pinned").await;

    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("deploy", Scope::session("s1")).with_budget(18))
        .await
        .unwrap();

    assert_eq!(result.pins.len(), 1);
    let ids: Vec<&str> = result.candidates.iter().map(|h| h.item.id()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(result.provenance.tokens_used, 18);
    assert!(!result.provenance.tier0_over_budget);
    assert!(result.provenance.truncated);
}

#[tokio::test]
async fn no_budget_returns_everything() {
    let store = memory_store().await;
    seed_candidates(&store).await;
    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("deploy", Scope::session("s1")))
        .await
        .unwrap();
    assert_eq!(result.candidates.len(), 3);
    assert!(!result.provenance.truncated);
    assert_eq!(result.provenance.tokens_used, 5 + 6 + 8);
}

#[tokio::test]
async fn pinned_summary_is_not_repeated_as_current() {
    let store = memory_store().await;
    let capsule = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "ship", Scope::session("s1")))
        .await
        .unwrap();
    let summary = store
        .insert_summary(SummaryDraft::new(&capsule.id, "release is blocked on review"))
        .await
        .unwrap();
    pin(&store, PinTargetType::Summary, &summary.id).await;

    let result = orchestrator(store)
        .retrieve(&RetrievalRequest::new("release", Scope::session("s1")))
        .await
        .unwrap();
    assert_eq!(result.pins.len(), 1);
    assert!(result.current_summary.is_none());
    assert!(result.candidates.iter().all(|h| h.item.id() != summary.id));
}

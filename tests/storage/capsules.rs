use crate::harness::{NOW, memory_store, observe};
use capsule_memory::MemoryError;
use capsule_memory::model::{CapsuleDraft, CapsuleStatus, CapsuleType, Scope, SummaryDraft};

#[tokio::test]
async fn one_open_session_capsule_per_session() {
    let store = memory_store().await;
    let first = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "a", Scope::session("s1")))
        .await
        .unwrap();
    let err = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "b", Scope::session("s1")))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Conflict(_)), "{err}");

    // Other sessions and workflow nodes are unaffected.
    store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "c", Scope::session("s2")))
        .await
        .unwrap();
    store
        .create_capsule(CapsuleDraft::new(CapsuleType::WorkflowNode, "d", Scope::session("s1")))
        .await
        .unwrap();

    store.close_capsule(&first.id, NOW).await.unwrap();
    let reopened = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "e", Scope::session("s1")))
        .await
        .unwrap();
    assert_ne!(reopened.id, first.id);
    let open = store.get_open_capsule_for_session("s1").await.unwrap().unwrap();
    assert_eq!(open.id, reopened.id);
}

#[tokio::test]
async fn sequences_increase_per_capsule_under_interleaving() {
    let store = memory_store().await;
    let a = store
        .create_capsule(CapsuleDraft::new(CapsuleType::WorkflowNode, "a", Scope::default()))
        .await
        .unwrap();
    let b = store
        .create_capsule(CapsuleDraft::new(CapsuleType::WorkflowNode, "b", Scope::default()))
        .await
        .unwrap();

    let mut seq_a = Vec::new();
    let mut seq_b = Vec::new();
    for i in 0..4 {
        let obs = observe(&store, &format!("o{i}"), "step", NOW + i, Scope::default()).await;
        if i % 2 == 0 {
            seq_a.push(store.attach_observation_to_capsule(&a.id, &obs.id).await.unwrap());
            let extra = observe(&store, &format!("x{i}"), "extra", NOW + i, Scope::default()).await;
            seq_b.push(store.attach_observation_to_capsule(&b.id, &extra.id).await.unwrap());
        } else {
            seq_b.push(store.attach_observation_to_capsule(&b.id, &obs.id).await.unwrap());
        }
    }
    assert_eq!(seq_a, vec![0, 1]);
    assert_eq!(seq_b, vec![0, 1, 2, 3]);

    let b = store.get_capsule_by_id(&b.id).await.unwrap().unwrap();
    assert_eq!(b.observation_ids, vec!["x0", "o1", "x2", "o3"]);
}

#[tokio::test]
async fn attach_errors() {
    let store = memory_store().await;
    let capsule = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "a", Scope::session("s1")))
        .await
        .unwrap();
    let obs = observe(&store, "o1", "x", NOW, Scope::session("s1")).await;

    let err = store.attach_observation_to_capsule("ghost", &obs.id).await.unwrap_err();
    assert!(err.is_not_found());
    let err = store.attach_observation_to_capsule(&capsule.id, "ghost").await.unwrap_err();
    assert!(err.is_not_found());

    store.attach_observation_to_capsule(&capsule.id, &obs.id).await.unwrap();
    let err = store.attach_observation_to_capsule(&capsule.id, &obs.id).await.unwrap_err();
    assert!(matches!(err, MemoryError::Conflict(_)));

    store.close_capsule(&capsule.id, NOW).await.unwrap();
    let other = observe(&store, "o2", "y", NOW, Scope::session("s1")).await;
    let err = store.attach_observation_to_capsule(&capsule.id, &other.id).await.unwrap_err();
    assert!(matches!(err, MemoryError::Conflict(_)));
}

#[tokio::test]
async fn close_with_summary_is_atomic() {
    let store = memory_store().await;
    let capsule = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "a", Scope::session("s1")))
        .await
        .unwrap();

    // An invalid summary leaves the capsule open.
    let err = store
        .close_capsule_with_summary(
            &capsule.id,
            NOW,
            Some(SummaryDraft {
                confidence: Some(1.5),
                ..SummaryDraft::new(&capsule.id, "too sure")
            }),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(store.get_capsule_by_id(&capsule.id).await.unwrap().unwrap().is_open());

    let closed = store
        .close_capsule_with_summary(&capsule.id, NOW, Some(SummaryDraft::new("", "Fixed bug")))
        .await
        .unwrap();
    assert_eq!(closed.capsule.status, CapsuleStatus::Closed);
    assert_eq!(closed.capsule.closed_at, Some(NOW));
    let summary = closed.summary.unwrap();
    assert_eq!(summary.capsule_id, capsule.id);
    assert!((summary.confidence - 0.8).abs() < f64::EPSILON);

    let err = store.close_capsule(&capsule.id, NOW).await.unwrap_err();
    assert!(matches!(err, MemoryError::NotFoundOrAlreadyClosed(_)));
}

#[tokio::test]
async fn latest_summary_wins() {
    let store = memory_store().await;
    let capsule = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "a", Scope::session("s1")))
        .await
        .unwrap();
    for (id, at) in [("s-old", NOW), ("s-new", NOW + 10), ("s-mid", NOW + 5)] {
        store
            .insert_summary(SummaryDraft {
                id: Some(id.into()),
                created_at: Some(at),
                ..SummaryDraft::new(&capsule.id, id)
            })
            .await
            .unwrap();
    }
    let latest = store.get_latest_summary_for_capsule(&capsule.id).await.unwrap().unwrap();
    assert_eq!(latest.id, "s-new");
    assert_eq!(store.list_summaries_for_capsule(&capsule.id).await.unwrap().len(), 3);

    let err = store.insert_summary(SummaryDraft::new("ghost", "x")).await.unwrap_err();
    assert!(err.is_not_found());
}

use crate::harness::{NOW, memory_store};
use capsule_memory::model::{
    CapsuleDraft, CapsuleType, ObservationDraft, ObservationKind, ProvenanceValue,
    REDACTED_TOMBSTONE, Scope,
};
use capsule_memory::storage::ObservationQuery;
use indexmap::IndexMap;

#[tokio::test]
async fn every_kind_round_trips_exactly() {
    let store = memory_store().await;
    let scope = Scope::session("s1").with_repo("r1").with_agent("a1").with_user("u1");

    for (i, kind) in ObservationKind::ALL.iter().enumerate() {
        let content = format!("{kind} événement #{i} · 日本語");
        let draft = ObservationDraft::new(kind.as_str(), content.clone())
            .with_timestamp(NOW + i64::try_from(i).unwrap())
            .with_scope(scope.clone())
            .with_provenance("tool", ProvenanceValue::from("bash"))
            .with_provenance(
                "args",
                ProvenanceValue::List(vec![ProvenanceValue::from(1), ProvenanceValue::from(true)]),
            )
            .with_provenance(
                "nested",
                ProvenanceValue::Map(IndexMap::from([(
                    "ratio".to_string(),
                    ProvenanceValue::Float(0.25),
                )])),
            );
        let stored = store.insert_observation(draft).await.unwrap();
        let fetched = store.get_observation_by_id(&stored.id).await.unwrap().unwrap();

        assert_eq!(fetched, stored);
        assert_eq!(fetched.kind, *kind);
        assert_eq!(fetched.content.as_deref(), Some(content.as_str()));
        assert_eq!(fetched.scope, scope);
        assert_eq!(fetched.timestamp, NOW + i64::try_from(i).unwrap());
    }
}

#[tokio::test]
async fn invalid_drafts_report_all_violations_and_write_nothing() {
    let store = memory_store().await;
    let err = store
        .insert_observation(ObservationDraft {
            timestamp: Some(-1),
            ..ObservationDraft::new("dream", " ")
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
    let message = err.to_string();
    assert!(message.contains("kind"), "{message}");
    assert!(message.contains("content"), "{message}");
    assert!(message.contains("timestamp"), "{message}");
    assert_eq!(store.stats().await.unwrap().observations, 0);
}

#[tokio::test]
async fn redaction_is_idempotent_and_keeps_linkage() {
    let store = memory_store().await;
    let capsule = store
        .create_capsule(CapsuleDraft::new(CapsuleType::Session, "work", Scope::session("s1")))
        .await
        .unwrap();
    let observation = store
        .record_observation(
            &capsule.id,
            ObservationDraft::new("command", "export API_KEY=hunter2")
                .with_scope(Scope::session("s1"))
                .with_provenance("cwd", ProvenanceValue::from("/home")),
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let redacted = store.redact_observation(&observation.id).await.unwrap();
        assert!(redacted.redacted);
        assert_eq!(redacted.content.as_deref(), Some(REDACTED_TOMBSTONE));
        assert!(redacted.provenance.is_empty());
        assert_eq!(redacted.kind, observation.kind);
        assert_eq!(redacted.timestamp, observation.timestamp);
        assert_eq!(redacted.scope, observation.scope);
    }

    let fetched = store.get_observation_by_id(&observation.id).await.unwrap().unwrap();
    assert!(fetched.redacted);
    let capsule = store.get_capsule_by_id(&capsule.id).await.unwrap().unwrap();
    assert_eq!(capsule.observation_ids, vec![observation.id.clone()]);

    // Hidden from default listings, visible on request.
    let default = store.query_observations(&ObservationQuery::default()).await.unwrap();
    assert!(default.is_empty());
    let all = store
        .query_observations(&ObservationQuery {
            include_redacted: true,
            ..ObservationQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    let err = store.redact_observation("missing").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn query_window_and_limit() {
    let store = memory_store().await;
    for i in 0..5 {
        crate::harness::observe(&store, &format!("o{i}"), "tick", NOW + i, Scope::session("s1")).await;
    }
    let window = store
        .query_observations(&ObservationQuery {
            from: Some(NOW + 1),
            to: Some(NOW + 3),
            ..ObservationQuery::default()
        })
        .await
        .unwrap();
    let ids: Vec<&str> = window.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["o3", "o2", "o1"]);

    let limited = store
        .query_observations(&ObservationQuery {
            limit: Some(2),
            ..ObservationQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, "o4");
}

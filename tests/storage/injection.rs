use crate::harness::{HOSTILE_SESSION, NOW, memory_store, observe};
use capsule_memory::model::{CapsuleDraft, CapsuleType, PinDraft, PinTargetType, Scope};
use capsule_memory::search::{LocalSearchProvider, SearchProvider, SearchRequest};
use capsule_memory::storage::{ExportOptions, ObservationQuery};

#[tokio::test]
async fn hostile_session_id_matches_nothing() {
    let store = memory_store().await;
    for session in ["s1", "s2"] {
        observe(&store, &format!("obs-{session}"), "quoted 'value' here", NOW, Scope::session(session)).await;
        store
            .create_capsule(CapsuleDraft::new(CapsuleType::Session, "work", Scope::session(session)))
            .await
            .unwrap();
        store
            .insert_pin(PinDraft {
                scope: Scope::session(session),
                ..PinDraft::new(PinTargetType::Observation, format!("obs-{session}"))
            })
            .await
            .unwrap();
    }
    let hostile = Scope::session(HOSTILE_SESSION);

    let rows = store
        .query_observations(&ObservationQuery {
            scope: hostile.clone(),
            include_redacted: true,
            ..ObservationQuery::default()
        })
        .await
        .unwrap();
    assert!(rows.is_empty());

    assert!(store.list_active_pins(Some(&hostile), NOW).await.unwrap().is_empty());
    assert!(store.get_open_capsule_for_session(HOSTILE_SESSION).await.unwrap().is_none());

    let dataset = store
        .export_dataset(&ExportOptions {
            scope: Some(hostile.clone()),
            ..ExportOptions::default()
        })
        .await
        .unwrap();
    assert!(dataset.observations.is_empty());
    assert!(dataset.capsules.is_empty());
    assert!(dataset.pins.is_empty());

    let provider = LocalSearchProvider::new(store.clone()).with_now(NOW);
    let response = provider
        .search(&SearchRequest::new("quoted").with_scope(hostile))
        .await
        .unwrap();
    assert!(response.hits.is_empty());

    // The same values remain storable and findable verbatim.
    observe(&store, "evil", "quoted payload", NOW, Scope::session(HOSTILE_SESSION)).await;
    let rows = store
        .query_observations(&ObservationQuery {
            scope: Scope::session(HOSTILE_SESSION),
            ..ObservationQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "evil");
}

#[tokio::test]
async fn hostile_query_text_is_inert() {
    let store = memory_store().await;
    observe(&store, "a", "drop table observations", NOW, Scope::session("s1")).await;
    let provider = LocalSearchProvider::new(store.clone()).with_now(NOW);
    for raw in ["'); DROP TABLE observations; --", "\" OR 1=1 --", "content:*", "NEAR(a b)"] {
        provider.search(&SearchRequest::new(raw)).await.unwrap();
    }
    assert_eq!(store.stats().await.unwrap().observations, 1);
}

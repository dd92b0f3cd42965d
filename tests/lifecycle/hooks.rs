use crate::harness::{NOW, disk_store};
use capsule_memory::CapsuleManager;
use capsule_memory::lifecycle::{CloseSignals, EventMapper, EventOutcome, MappedEvent, SessionHooks};
use capsule_memory::model::{ObservationDraft, ProvenanceValue, Scope};
use capsule_memory::search::{LocalSearchProvider, SearchProvider, SearchRequest};
use serde_json::{Value, json};

/// Maps loosely-shaped JSON host events, the way a CLI adapter would.
struct JsonMapper;

impl EventMapper for JsonMapper {
    type Event = Value;

    fn map_event(&self, event: &Value) -> MappedEvent {
        match event["type"].as_str() {
            Some("bash") => match event["command"].as_str() {
                Some(command) => MappedEvent::Observation(
                    ObservationDraft::new("command", command)
                        .with_timestamp(NOW)
                        .with_provenance("exit_code", ProvenanceValue::from(event["exit"].as_i64().unwrap_or(0))),
                ),
                None => MappedEvent::Error("bash event without command".into()),
            },
            Some("edit") => MappedEvent::Observation(
                ObservationDraft::new("file_diff", event["diff"].as_str().unwrap_or_default())
                    .with_timestamp(NOW),
            ),
            Some("session_resumed") => MappedEvent::Skip,
            _ => MappedEvent::Error("unknown event".into()),
        }
    }
}

#[tokio::test]
async fn adapter_session_is_captured_and_searchable() {
    let (_tmp, store) = disk_store().await;
    let mut hooks = SessionHooks::new(CapsuleManager::new(store.clone()), JsonMapper);
    let ctx = hooks
        .on_session_start("s1", Scope::default().with_repo("repo-x"), Some("migrate db"))
        .await
        .unwrap();

    let events = [
        json!({"type": "bash", "command": "sqlx migrate run", "exit": 0}),
        json!({"type": "session_resumed"}),
        json!({"type": "bash"}),
        json!({"type": "edit", "diff": "+ALTER TABLE users ADD COLUMN email"}),
        json!({"type": "telemetry"}),
    ];
    let mut recorded = 0;
    let mut skipped = 0;
    let mut failed = 0;
    for event in &events {
        match hooks.on_event("s1", event).await {
            EventOutcome::Recorded(observation) => {
                assert_eq!(observation.scope.repo_id.as_deref(), Some("repo-x"));
                recorded += 1;
            }
            EventOutcome::Skipped => skipped += 1,
            EventOutcome::Failed(_) => failed += 1,
        }
    }
    assert_eq!((recorded, skipped, failed), (2, 1, 2));
    assert_eq!(hooks.manager().event_count(&ctx.capsule.id), Some(2));

    let closed = hooks
        .on_stop("s1", Some(CloseSignals::summary("Migrated users table")))
        .await
        .unwrap();
    assert_eq!(closed.capsule.observation_ids.len(), 2);
    assert_eq!(closed.summary.as_ref().unwrap().evidence_refs.len(), 2);

    let provider = LocalSearchProvider::new(store).with_now(NOW);
    let response = provider
        .search(&SearchRequest::new("migrate").with_scope(Scope::default().with_repo("repo-x")))
        .await
        .unwrap();
    assert!(!response.hits.is_empty());
}

#[tokio::test]
async fn restarting_a_session_resumes_its_capsule() {
    let (_tmp, store) = disk_store().await;
    let first_id = {
        let mut hooks = SessionHooks::new(CapsuleManager::new(store.clone()), JsonMapper);
        let ctx = hooks.on_session_start("s1", Scope::default(), None).await.unwrap();
        hooks
            .on_event("s1", &json!({"type": "bash", "command": "ls"}))
            .await;
        ctx.capsule.id
    };

    let mut hooks = SessionHooks::new(CapsuleManager::new(store), JsonMapper);
    let ctx = hooks.on_session_start("s1", Scope::default(), None).await.unwrap();
    assert_eq!(ctx.capsule.id, first_id);
    assert_eq!(ctx.capsule.observation_ids.len(), 1);
}

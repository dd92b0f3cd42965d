use crate::harness::{HOSTILE_SESSION, NOW, memory_store};
use capsule_memory::model::{PinDraft, PinTargetType, Scope};

fn pin(id: &str, expires_at: Option<i64>, scope: Scope) -> PinDraft {
    PinDraft {
        id: Some(id.into()),
        created_at: Some(NOW - 100),
        expires_at,
        scope,
        ..PinDraft::new(PinTargetType::Observation, "o1")
    }
}

#[tokio::test]
async fn expiry_is_evaluated_at_read_time() {
    let store = memory_store().await;
    store.insert_pin(pin("never", None, Scope::default())).await.unwrap();
    store.insert_pin(pin("expired", Some(NOW - 1), Scope::default())).await.unwrap();
    store.insert_pin(pin("boundary", Some(NOW), Scope::default())).await.unwrap();
    store.insert_pin(pin("future", Some(NOW + 1), Scope::default())).await.unwrap();

    let active: Vec<String> = store
        .list_active_pins(None, NOW)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    // `expires_at <= now` is expired; ties on created_at order by id.
    assert_eq!(active, vec!["future", "never"]);

    // The same pin becomes inactive once the clock passes it.
    let later = store.list_active_pins(None, NOW + 1).await.unwrap();
    assert_eq!(later.len(), 1);
    assert_eq!(later[0].id, "never");
}

#[tokio::test]
async fn scoped_pins_match_their_scope_or_are_global() {
    let store = memory_store().await;
    store.insert_pin(pin("global", None, Scope::default())).await.unwrap();
    store.insert_pin(pin("repo-r1", None, Scope::default().with_repo("r1"))).await.unwrap();
    store.insert_pin(pin("repo-r2", None, Scope::default().with_repo("r2"))).await.unwrap();

    let scope = Scope::session("s1").with_repo("r1");
    let mut ids: Vec<String> = store
        .list_active_pins(Some(&scope), NOW)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["global", "repo-r1"]);
}

#[tokio::test]
async fn unpin_removes_and_errors_when_absent() {
    let store = memory_store().await;
    store.insert_pin(pin("p1", None, Scope::default())).await.unwrap();
    store.delete_pin("p1").await.unwrap();
    assert!(store.list_active_pins(None, NOW).await.unwrap().is_empty());
    assert!(store.delete_pin("p1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn hostile_session_sees_only_global_pins() {
    let store = memory_store().await;
    store.insert_pin(pin("global", None, Scope::default())).await.unwrap();
    store.insert_pin(pin("s1", None, Scope::session("s1"))).await.unwrap();
    store.insert_pin(pin("s2-repo", None, Scope::session("s2").with_repo("r1"))).await.unwrap();
    store.insert_pin(pin("repo", None, Scope::default().with_repo("r1"))).await.unwrap();

    let hostile = Scope::session(HOSTILE_SESSION);
    let ids: Vec<String> = store
        .list_active_pins(Some(&hostile), NOW)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec!["global", "repo"]);
    let pins = store.list_active_pins(Some(&hostile), NOW).await.unwrap();
    assert!(pins.iter().all(|p| p.scope.session_id.is_none()));

    let hostile_repo = Scope::session(HOSTILE_SESSION).with_repo(HOSTILE_SESSION);
    let ids: Vec<String> = store
        .list_active_pins(Some(&hostile_repo), NOW)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(ids, vec!["global"]);
}

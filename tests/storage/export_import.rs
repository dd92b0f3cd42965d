use crate::harness::{NOW, memory_store, observe};
use capsule_memory::MemoryError;
use capsule_memory::model::{
    CapsuleDraft, CapsuleType, ObservationDraft, PinDraft, PinTargetType, Scope, SummaryDraft,
};
use capsule_memory::storage::{ExportDataset, ExportOptions, SqliteStore};

async fn populated() -> SqliteStore {
    let store = memory_store().await;
    let scope = Scope::session("s1").with_repo("r1");
    let capsule = store
        .create_capsule(CapsuleDraft {
            opened_at: Some(NOW),
            ..CapsuleDraft::new(CapsuleType::Session, "fix flaky test", scope.clone())
        })
        .await
        .unwrap();
    // Attach in an order that differs from id order.
    for (id, offset) in [("obs-c", 0), ("obs-a", 1), ("obs-b", 2)] {
        store
            .record_observation(
                &capsule.id,
                ObservationDraft::new("command", format!("run {id}"))
                    .with_id(id)
                    .with_timestamp(NOW + offset)
                    .with_scope(scope.clone()),
            )
            .await
            .unwrap();
    }
    observe(&store, "loose", "unattached note", NOW + 3, Scope::session("s2")).await;
    store.redact_observation("obs-b").await.unwrap();
    store
        .close_capsule_with_summary(
            &capsule.id,
            NOW + 10,
            Some(SummaryDraft {
                id: Some("sum-1".into()),
                created_at: Some(NOW + 10),
                confidence: Some(0.9),
                evidence_refs: Some(vec!["obs-a".into()]),
                ..SummaryDraft::new("", "Fixed the flaky test")
            }),
        )
        .await
        .unwrap();
    store
        .insert_pin(PinDraft {
            id: Some("pin-1".into()),
            created_at: Some(NOW + 11),
            reason: Some("root cause".into()),
            expires_at: Some(NOW + 1_000_000),
            scope: Scope::session("s1"),
            ..PinDraft::new(PinTargetType::Summary, "sum-1")
        })
        .await
        .unwrap();
    store
}

fn everything() -> ExportOptions {
    ExportOptions {
        include_redacted: true,
        ..ExportOptions::default()
    }
}

fn collections(dataset: &ExportDataset) -> ExportDataset {
    ExportDataset {
        exported_at: 0,
        ..dataset.clone()
    }
}

#[tokio::test]
async fn export_import_export_is_lossless() {
    let source = populated().await;
    let first = source.export_dataset(&everything()).await.unwrap();
    assert_eq!(first.observations.len(), 4);
    assert_eq!(first.capsules[0].observation_ids, vec!["obs-c", "obs-a", "obs-b"]);

    let target = memory_store().await;
    let report = target.import_dataset(&first).await.unwrap();
    assert_eq!(report.inserted(), 4 + 1 + 1 + 1);
    assert!(report.warnings.is_empty());

    let second = target.export_dataset(&everything()).await.unwrap();
    assert_eq!(collections(&second), collections(&first));
}

#[tokio::test]
async fn export_is_deterministic_and_hides_redacted_by_default() {
    let store = populated().await;
    let a = store.export_dataset(&ExportOptions::default()).await.unwrap();
    let b = store.export_dataset(&ExportOptions::default()).await.unwrap();
    assert_eq!(collections(&a), collections(&b));
    assert!(a.observations.iter().all(|o| !o.redacted));
    let ids: Vec<&str> = a.observations.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["obs-c", "obs-a", "loose"]);
}

#[tokio::test]
async fn reimport_skips_existing_rows() {
    let source = populated().await;
    let dataset = source.export_dataset(&everything()).await.unwrap();
    let report = source.import_dataset(&dataset).await.unwrap();
    assert_eq!(report.inserted(), 0);
    assert_eq!(report.skipped(), 7);
}

#[tokio::test]
async fn existing_rows_are_never_overwritten() {
    let source = populated().await;
    let mut dataset = source.export_dataset(&everything()).await.unwrap();
    dataset.observations[0].content = Some("tampered".into());

    source.import_dataset(&dataset).await.unwrap();
    let kept = source
        .get_observation_by_id(&dataset.observations[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(kept.content.as_deref(), Some("tampered"));
}

#[tokio::test]
async fn wrong_version_writes_nothing() {
    let source = populated().await;
    let mut dataset = source.export_dataset(&everything()).await.unwrap();
    dataset.version = "2.0".into();

    let target = memory_store().await;
    let err = target.import_dataset(&dataset).await.unwrap_err();
    assert!(matches!(err, MemoryError::VersionMismatch { .. }));
    assert_eq!(target.stats().await.unwrap().observations, 0);
}

#[tokio::test]
async fn bad_rows_become_warnings() {
    let source = populated().await;
    let mut dataset = source.export_dataset(&everything()).await.unwrap();
    dataset.summaries[0].confidence = 7.0;
    dataset.pins[0].target_id = " ".into();

    let target = memory_store().await;
    let report = target.import_dataset(&dataset).await.unwrap();
    assert_eq!(report.summaries.failed, 1);
    assert_eq!(report.pins.failed, 1);
    assert_eq!(report.observations.inserted, 4);
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings.iter().any(|w| w.entity == "summary" && w.id == "sum-1"));
}

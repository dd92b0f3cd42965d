use crate::harness::{NOW, memory_store, observe};
use capsule_memory::bundle::{
    RestoreOptions, compare_bundles, create_export_bundle, merge_bundles, restore_from_bundle,
};
use capsule_memory::model::Scope;
use capsule_memory::storage::ExportOptions;

#[tokio::test]
async fn merged_bundle_prefers_the_first_source() {
    let laptop = memory_store().await;
    observe(&laptop, "shared", "laptop wording", NOW - 20, Scope::session("s1")).await;
    observe(&laptop, "laptop-only", "local experiment", NOW - 10, Scope::session("s1")).await;

    let desktop = memory_store().await;
    observe(&desktop, "shared", "desktop wording", NOW - 30, Scope::session("s1")).await;
    observe(&desktop, "desktop-only", "profiling run", NOW - 5, Scope::session("s1")).await;

    let options = ExportOptions::default();
    let a = create_export_bundle(&laptop, &options, None).await.unwrap();
    let b = create_export_bundle(&desktop, &options, None).await.unwrap();

    let diff = compare_bundles(&a, &b);
    assert_eq!(diff.observations.common, vec!["shared"]);
    assert_eq!(diff.observations.added, vec!["desktop-only"]);
    assert_eq!(diff.observations.removed, vec!["laptop-only"]);

    let merged = merge_bundles(&[a, b], None).unwrap();
    let ids: Vec<&str> = merged.dataset.observations.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["shared", "laptop-only", "desktop-only"]);

    let target = memory_store().await;
    let report = restore_from_bundle(&target, &merged, RestoreOptions::default())
        .await
        .unwrap();
    assert_eq!(report.observations.inserted, 3);
    let shared = target.get_observation_by_id("shared").await.unwrap().unwrap();
    assert_eq!(shared.content.as_deref(), Some("laptop wording"));
    assert_eq!(shared.timestamp, NOW - 20);
}

#[tokio::test]
async fn merge_order_decides_the_winner() {
    let laptop = memory_store().await;
    observe(&laptop, "shared", "laptop wording", NOW, Scope::session("s1")).await;
    let desktop = memory_store().await;
    observe(&desktop, "shared", "desktop wording", NOW, Scope::session("s1")).await;

    let options = ExportOptions::default();
    let a = create_export_bundle(&laptop, &options, None).await.unwrap();
    let b = create_export_bundle(&desktop, &options, None).await.unwrap();
    let merged = merge_bundles(&[b, a], None).unwrap();
    assert_eq!(merged.dataset.observations.len(), 1);
    assert_eq!(
        merged.dataset.observations[0].content.as_deref(),
        Some("desktop wording")
    );
}

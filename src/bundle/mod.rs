//! Portable export bundles: a versioned envelope around an
//! [`ExportDataset`].

pub mod merge;

pub use merge::{BundleDiff, EntityDiff, compare_bundles, merge_bundles};

use crate::error::{BundleError, MemoryError, Result};
use crate::model::{Timestamp, now_millis};
use crate::storage::{DATASET_VERSION, ExportDataset, ExportOptions, ImportReport, SqliteStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BUNDLE_VERSION: &str = "1.0";

const COLLECTIONS: [&str; 4] = ["observations", "capsules", "summaries", "pins"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub bundle_version: String,
    pub exported_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BundleMetadata>,
    pub dataset: ExportDataset,
}

impl ExportBundle {
    pub fn new(dataset: ExportDataset, metadata: Option<BundleMetadata>) -> Self {
        Self {
            bundle_version: BUNDLE_VERSION.to_string(),
            exported_at: now_millis(),
            metadata,
            dataset,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    pub skip_validation: bool,
    /// Count what would be imported without writing.
    pub dry_run: bool,
}

pub async fn create_export_bundle(
    store: &SqliteStore,
    options: &ExportOptions,
    metadata: Option<BundleMetadata>,
) -> Result<ExportBundle> {
    let dataset = store.export_dataset(options).await?;
    Ok(ExportBundle::new(dataset, metadata))
}

/// Structural check of an untyped bundle. Returns every violation found;
/// an empty list means the bundle is well formed.
pub fn validate_bundle(value: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(root) = value.as_object() else {
        errors.push("bundle must be a JSON object".to_string());
        return errors;
    };

    match root.get("bundleVersion").and_then(Value::as_str) {
        Some(BUNDLE_VERSION) => {}
        Some(other) => errors.push(format!(
            "unsupported bundleVersion {other:?} (expected {BUNDLE_VERSION:?})"
        )),
        None => errors.push("bundleVersion must be a string".to_string()),
    }
    if !root.get("exportedAt").is_some_and(Value::is_i64) {
        errors.push("exportedAt must be an integer timestamp".to_string());
    }
    if let Some(metadata) = root.get("metadata").filter(|m| !m.is_null()) {
        validate_metadata(metadata, &mut errors);
    }

    let Some(dataset) = root.get("dataset").and_then(Value::as_object) else {
        errors.push("dataset must be an object".to_string());
        return errors;
    };
    match dataset.get("version").and_then(Value::as_str) {
        Some(DATASET_VERSION) => {}
        Some(other) => errors.push(format!(
            "unsupported dataset.version {other:?} (expected {DATASET_VERSION:?})"
        )),
        None => errors.push("dataset.version must be a string".to_string()),
    }
    if !dataset.get("exportedAt").is_some_and(Value::is_i64) {
        errors.push("dataset.exportedAt must be an integer timestamp".to_string());
    }
    for collection in COLLECTIONS {
        if !dataset.get(collection).is_some_and(Value::is_array) {
            errors.push(format!("dataset.{collection} must be an array"));
        }
    }
    errors
}

fn validate_metadata(metadata: &Value, errors: &mut Vec<String>) {
    let Some(metadata) = metadata.as_object() else {
        errors.push("metadata must be an object".to_string());
        return;
    };
    if metadata
        .get("description")
        .is_some_and(|d| !d.is_null() && !d.is_string())
    {
        errors.push("metadata.description must be a string".to_string());
    }
    if let Some(tags) = metadata.get("tags").filter(|t| !t.is_null()) {
        let all_strings = tags
            .as_array()
            .is_some_and(|tags| tags.iter().all(Value::is_string));
        if !all_strings {
            errors.push("metadata.tags must be an array of strings".to_string());
        }
    }
}

pub fn serialize_bundle(bundle: &ExportBundle) -> Result<String> {
    serde_json::to_string_pretty(bundle).map_err(|e| BundleError::MalformedJson(e).into())
}

/// Parse and validate a bundle. Unparseable text is `MalformedJson`;
/// parseable JSON of the wrong shape is `InvalidBundle`.
pub fn deserialize_bundle(json: &str) -> Result<ExportBundle> {
    let value: Value = serde_json::from_str(json).map_err(BundleError::MalformedJson)?;
    let errors = validate_bundle(&value);
    if !errors.is_empty() {
        return Err(BundleError::InvalidBundle(errors).into());
    }
    serde_json::from_value(value)
        .map_err(|e| BundleError::InvalidBundle(vec![format!("dataset entities: {e}")]).into())
}

/// Import a bundle's dataset into `store`.
pub async fn restore_from_bundle(
    store: &SqliteStore,
    bundle: &ExportBundle,
    options: RestoreOptions,
) -> Result<ImportReport> {
    if !options.skip_validation {
        let value = serde_json::to_value(bundle).map_err(BundleError::MalformedJson)?;
        let errors = validate_bundle(&value);
        if !errors.is_empty() {
            return Err(MemoryError::Bundle(BundleError::InvalidBundle(errors)));
        }
    }

    let report = if options.dry_run {
        store.preview_import(&bundle.dataset).await?
    } else {
        store.import_dataset(&bundle.dataset).await?
    };
    tracing::info!(
        dry_run = options.dry_run,
        inserted = report.inserted(),
        skipped = report.skipped(),
        warnings = report.warnings.len(),
        "bundle restored"
    );
    Ok(report)
}

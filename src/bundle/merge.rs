use super::{BundleMetadata, ExportBundle};
use crate::error::{BundleError, Result};
use crate::model::{Scope, Timestamp, now_millis};
use crate::storage::{DATASET_VERSION, ExportDataset};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Id-level difference for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityDiff {
    /// In the second bundle only.
    pub added: Vec<String>,
    /// In the first bundle only.
    pub removed: Vec<String>,
    pub common: Vec<String>,
}

impl EntityDiff {
    fn between<'a>(
        a: impl IntoIterator<Item = &'a str>,
        b: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let a: BTreeSet<&str> = a.into_iter().collect();
        let b: BTreeSet<&str> = b.into_iter().collect();
        let owned = |ids: Vec<&&str>| -> Vec<String> {
            ids.into_iter().map(|id| (*id).to_string()).collect()
        };
        Self {
            added: owned(b.difference(&a).collect()),
            removed: owned(a.difference(&b).collect()),
            common: owned(a.intersection(&b).collect()),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleDiff {
    pub observations: EntityDiff,
    pub capsules: EntityDiff,
    pub summaries: EntityDiff,
    pub pins: EntityDiff,
}

impl BundleDiff {
    pub fn is_unchanged(&self) -> bool {
        self.observations.is_unchanged()
            && self.capsules.is_unchanged()
            && self.summaries.is_unchanged()
            && self.pins.is_unchanged()
    }
}

/// Compare the ids present in `a` and `b`. Content is not compared.
pub fn compare_bundles(a: &ExportBundle, b: &ExportBundle) -> BundleDiff {
    let (a, b) = (&a.dataset, &b.dataset);
    BundleDiff {
        observations: EntityDiff::between(
            a.observations.iter().map(|o| o.id.as_str()),
            b.observations.iter().map(|o| o.id.as_str()),
        ),
        capsules: EntityDiff::between(
            a.capsules.iter().map(|c| c.id.as_str()),
            b.capsules.iter().map(|c| c.id.as_str()),
        ),
        summaries: EntityDiff::between(
            a.summaries.iter().map(|s| s.id.as_str()),
            b.summaries.iter().map(|s| s.id.as_str()),
        ),
        pins: EntityDiff::between(
            a.pins.iter().map(|p| p.id.as_str()),
            b.pins.iter().map(|p| p.id.as_str()),
        ),
    }
}

/// Keep the first occurrence of each id across `groups`, in order.
fn first_wins<'a, T: Clone + 'a>(
    groups: impl Iterator<Item = &'a [T]>,
    id: impl Fn(&T) -> &str,
) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for item in groups.flatten() {
        if seen.insert(id(item).to_string()) {
            merged.push(item.clone());
        }
    }
    merged
}

fn sort_canonical<T>(items: &mut [T], key: impl Fn(&T) -> (Timestamp, &str)) {
    items.sort_by(|a, b| key(a).cmp(&key(b)));
}

/// Union of several bundles. When an id appears more than once, the copy
/// from the earliest bundle in `bundles` is kept.
pub fn merge_bundles(
    bundles: &[ExportBundle],
    metadata: Option<BundleMetadata>,
) -> Result<ExportBundle> {
    let first = bundles.first().ok_or(BundleError::EmptyMerge)?;
    let datasets = || bundles.iter().map(|b| &b.dataset);

    let mut observations = first_wins(datasets().map(|d| d.observations.as_slice()), |o| o.id.as_str());
    let mut capsules = first_wins(datasets().map(|d| d.capsules.as_slice()), |c| c.id.as_str());
    let mut summaries = first_wins(datasets().map(|d| d.summaries.as_slice()), |s| s.id.as_str());
    let mut pins = first_wins(datasets().map(|d| d.pins.as_slice()), |p| p.id.as_str());

    sort_canonical(&mut observations, |o| (o.timestamp, o.id.as_str()));
    sort_canonical(&mut capsules, |c| (c.opened_at, c.id.as_str()));
    sort_canonical(&mut summaries, |s| (s.created_at, s.id.as_str()));
    sort_canonical(&mut pins, |p| (p.created_at, p.id.as_str()));

    // A shared scope survives the merge; mixed scopes do not.
    let scope: Option<Scope> = first.dataset.scope.clone().filter(|scope| {
        datasets().all(|d| d.scope.as_ref() == Some(scope))
    });

    let now = now_millis();
    let dataset = ExportDataset {
        version: DATASET_VERSION.to_string(),
        exported_at: now,
        scope,
        observations,
        capsules,
        summaries,
        pins,
    };
    tracing::info!(
        bundles = bundles.len(),
        observations = dataset.observations.len(),
        capsules = dataset.capsules.len(),
        summaries = dataset.summaries.len(),
        pins = dataset.pins.len(),
        "bundles merged"
    );
    Ok(ExportBundle {
        exported_at: now,
        ..ExportBundle::new(dataset, metadata)
    })
}

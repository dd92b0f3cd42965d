//! Deterministic dataset export and transactional, insert-if-absent import.

use super::SqliteStore;
use super::capsules::{capsule_exists, insert_capsule_row, observation_ids_by_capsule};
use super::codec::{
    CAPSULE_COLUMNS, OBSERVATION_COLUMNS, PIN_COLUMNS, SUMMARY_COLUMNS, capsule_from_row,
    observation_from_row, pin_from_row, summary_from_row,
};
use super::filters;
use super::observations::{insert_observation_row, observation_exists};
use super::pins::{insert_pin_row, pin_exists};
use super::summaries::{insert_summary_row, summary_exists};
use crate::error::{MemoryError, Result};
use crate::model::{
    Capsule, Observation, Pin, Scope, Summary, Timestamp, ValidationErrors, check_capsule,
    check_observation, check_pin, check_summary, now_millis,
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, QueryBuilder, Sqlite, Transaction};

/// Dataset format version written by this build and the only one accepted.
pub const DATASET_VERSION: &str = "1.0";

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub scope: Option<Scope>,
    pub include_redacted: bool,
    /// Per-collection row cap.
    pub limit: Option<usize>,
}

/// Snapshot of all four collections, each sorted by its primary timestamp
/// ascending with id as tiebreak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDataset {
    pub version: String,
    pub exported_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    pub observations: Vec<Observation>,
    pub capsules: Vec<Capsule>,
    pub summaries: Vec<Summary>,
    pub pins: Vec<Pin>,
}

impl ExportDataset {
    pub fn empty() -> Self {
        Self {
            version: DATASET_VERSION.to_string(),
            exported_at: now_millis(),
            scope: None,
            observations: Vec::new(),
            capsules: Vec::new(),
            summaries: Vec::new(),
            pins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportCounts {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// A row that could not be imported. The rest of the import continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportWarning {
    pub entity: &'static str,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub observations: ImportCounts,
    pub capsules: ImportCounts,
    pub summaries: ImportCounts,
    pub pins: ImportCounts,
    pub warnings: Vec<ImportWarning>,
}

impl ImportReport {
    pub fn inserted(&self) -> usize {
        self.observations.inserted + self.capsules.inserted + self.summaries.inserted + self.pins.inserted
    }

    pub fn skipped(&self) -> usize {
        self.observations.skipped + self.capsules.skipped + self.summaries.skipped + self.pins.skipped
    }
}

fn check_version(dataset: &ExportDataset) -> Result<()> {
    if dataset.version == DATASET_VERSION {
        Ok(())
    } else {
        Err(MemoryError::VersionMismatch {
            expected: DATASET_VERSION.to_string(),
            found: dataset.version.clone(),
        })
    }
}

/// Errors that only concern the row being imported.
fn is_row_level(err: &MemoryError) -> bool {
    matches!(
        err,
        MemoryError::Validation(_)
            | MemoryError::Conflict(_)
            | MemoryError::NotFound { .. }
            | MemoryError::Database(sqlx::Error::Database(_))
    )
}

/// Outcome bookkeeping for one imported row.
struct RowSink<'r> {
    entity: &'static str,
    counts: &'r mut ImportCounts,
    warnings: &'r mut Vec<ImportWarning>,
}

impl RowSink<'_> {
    fn fail(&mut self, id: &str, err: &MemoryError) {
        tracing::warn!(entity = self.entity, id, error = %err, "import row rejected");
        self.counts.failed += 1;
        self.warnings.push(ImportWarning {
            entity: self.entity,
            id: id.to_string(),
            message: err.to_string(),
        });
    }

    /// Commit or roll back the row's savepoint according to `outcome`.
    async fn settle(
        &mut self,
        savepoint: Transaction<'_, Sqlite>,
        id: &str,
        outcome: Result<()>,
    ) -> Result<()> {
        match outcome {
            Ok(()) => {
                savepoint.commit().await?;
                self.counts.inserted += 1;
                Ok(())
            }
            Err(err) if is_row_level(&err) => {
                savepoint.rollback().await?;
                self.fail(id, &err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn audit(result: std::result::Result<(), ValidationErrors>) -> Result<()> {
    result.map_err(MemoryError::from)
}

impl SqliteStore {
    /// Read every collection inside one read transaction so the snapshot is
    /// consistent.
    pub async fn export_dataset(&self, options: &ExportOptions) -> Result<ExportDataset> {
        let scope = options.scope.clone().unwrap_or_default();
        let mut tx = self.pool.begin().await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations o WHERE 1 = 1"
        ));
        filters::push_scope_eq(&mut qb, "o", &scope);
        if !options.include_redacted {
            qb.push(" AND o.redacted = 0");
        }
        qb.push(" ORDER BY o.timestamp ASC, o.id ASC");
        filters::push_limit(&mut qb, options.limit);
        let observations = qb
            .build()
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(observation_from_row)
            .collect::<Result<Vec<_>>>()?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules c WHERE 1 = 1"
        ));
        filters::push_scope_eq(&mut qb, "c", &scope);
        qb.push(" ORDER BY c.opened_at ASC, c.id ASC");
        filters::push_limit(&mut qb, options.limit);
        let capsule_rows = qb.build().fetch_all(&mut *tx).await?;
        let mut observation_ids = observation_ids_by_capsule(&mut tx).await?;
        let mut capsules = Vec::with_capacity(capsule_rows.len());
        for row in &capsule_rows {
            let mut capsule = capsule_from_row(row)?;
            capsule.observation_ids = observation_ids.remove(&capsule.id).unwrap_or_default();
            capsules.push(capsule);
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries s WHERE 1 = 1"
        ));
        filters::push_scope_eq(&mut qb, "s", &scope);
        qb.push(" ORDER BY s.created_at ASC, s.id ASC");
        filters::push_limit(&mut qb, options.limit);
        let summaries = qb
            .build()
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(summary_from_row)
            .collect::<Result<Vec<_>>>()?;

        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {PIN_COLUMNS} FROM pins p WHERE 1 = 1"));
        filters::push_scope_eq(&mut qb, "p", &scope);
        qb.push(" ORDER BY p.created_at ASC, p.id ASC");
        filters::push_limit(&mut qb, options.limit);
        let pins = qb
            .build()
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(pin_from_row)
            .collect::<Result<Vec<_>>>()?;

        tx.commit().await?;

        tracing::info!(
            observations = observations.len(),
            capsules = capsules.len(),
            summaries = summaries.len(),
            pins = pins.len(),
            "dataset exported"
        );
        Ok(ExportDataset {
            version: DATASET_VERSION.to_string(),
            exported_at: now_millis(),
            scope: options.scope.clone(),
            observations,
            capsules,
            summaries,
            pins,
        })
    }

    /// Insert every row whose id is not already present.
    ///
    /// Runs in one transaction; each row gets its own savepoint so a bad row
    /// is reported in [`ImportReport::warnings`] without disturbing others.
    /// An unsupported version is rejected before anything is written.
    pub async fn import_dataset(&self, dataset: &ExportDataset) -> Result<ImportReport> {
        check_version(dataset)?;
        let mut report = ImportReport::default();
        let mut tx = self.pool.begin().await?;

        {
            let mut sink = RowSink {
                entity: "observation",
                counts: &mut report.observations,
                warnings: &mut report.warnings,
            };
            for observation in &dataset.observations {
                if observation_exists(&mut tx, &observation.id).await? {
                    sink.counts.skipped += 1;
                    continue;
                }
                let mut savepoint = Connection::begin(&mut *tx).await?;
                let outcome = match audit(check_observation(observation)) {
                    Ok(()) => insert_observation_row(&mut savepoint, observation).await,
                    Err(err) => Err(err),
                };
                sink.settle(savepoint, &observation.id, outcome).await?;
            }
        }

        {
            let mut sink = RowSink {
                entity: "capsule",
                counts: &mut report.capsules,
                warnings: &mut report.warnings,
            };
            for capsule in &dataset.capsules {
                if capsule_exists(&mut tx, &capsule.id).await? {
                    sink.counts.skipped += 1;
                    continue;
                }
                let mut savepoint = Connection::begin(&mut *tx).await?;
                let outcome = match audit(check_capsule(capsule)) {
                    Ok(()) => insert_capsule_row(&mut savepoint, capsule).await,
                    Err(err) => Err(err),
                };
                sink.settle(savepoint, &capsule.id, outcome).await?;
            }
        }

        {
            let mut sink = RowSink {
                entity: "summary",
                counts: &mut report.summaries,
                warnings: &mut report.warnings,
            };
            for summary in &dataset.summaries {
                if summary_exists(&mut tx, &summary.id).await? {
                    sink.counts.skipped += 1;
                    continue;
                }
                let mut savepoint = Connection::begin(&mut *tx).await?;
                let outcome = match audit(check_summary(summary)) {
                    Ok(()) => insert_summary_row(&mut savepoint, summary).await,
                    Err(err) => Err(err),
                };
                sink.settle(savepoint, &summary.id, outcome).await?;
            }
        }

        {
            let mut sink = RowSink {
                entity: "pin",
                counts: &mut report.pins,
                warnings: &mut report.warnings,
            };
            for pin in &dataset.pins {
                if pin_exists(&mut tx, &pin.id).await? {
                    sink.counts.skipped += 1;
                    continue;
                }
                let mut savepoint = Connection::begin(&mut *tx).await?;
                let outcome = match audit(check_pin(pin)) {
                    Ok(()) => insert_pin_row(&mut savepoint, pin).await,
                    Err(err) => Err(err),
                };
                sink.settle(savepoint, &pin.id, outcome).await?;
            }
        }

        tx.commit().await?;
        tracing::info!(
            inserted = report.inserted(),
            skipped = report.skipped(),
            warnings = report.warnings.len(),
            "dataset imported"
        );
        Ok(report)
    }

    /// Count what [`SqliteStore::import_dataset`] would do without writing.
    ///
    /// Rows failing the field audit count as failed; constraint failures
    /// only surface on a real import.
    pub async fn preview_import(&self, dataset: &ExportDataset) -> Result<ImportReport> {
        check_version(dataset)?;
        let mut report = ImportReport::default();
        let mut conn = self.pool.acquire().await?;

        for observation in &dataset.observations {
            let exists = observation_exists(&mut conn, &observation.id).await?;
            tally(
                &mut report.observations,
                &mut report.warnings,
                "observation",
                &observation.id,
                exists,
                audit(check_observation(observation)),
            );
        }
        for capsule in &dataset.capsules {
            let exists = capsule_exists(&mut conn, &capsule.id).await?;
            tally(
                &mut report.capsules,
                &mut report.warnings,
                "capsule",
                &capsule.id,
                exists,
                audit(check_capsule(capsule)),
            );
        }
        for summary in &dataset.summaries {
            let exists = summary_exists(&mut conn, &summary.id).await?;
            tally(
                &mut report.summaries,
                &mut report.warnings,
                "summary",
                &summary.id,
                exists,
                audit(check_summary(summary)),
            );
        }
        for pin in &dataset.pins {
            let exists = pin_exists(&mut conn, &pin.id).await?;
            tally(
                &mut report.pins,
                &mut report.warnings,
                "pin",
                &pin.id,
                exists,
                audit(check_pin(pin)),
            );
        }
        Ok(report)
    }
}

fn tally(
    counts: &mut ImportCounts,
    warnings: &mut Vec<ImportWarning>,
    entity: &'static str,
    id: &str,
    exists: bool,
    audit: Result<()>,
) {
    if exists {
        counts.skipped += 1;
        return;
    }
    match audit {
        Ok(()) => counts.inserted += 1,
        Err(err) => {
            let mut sink = RowSink {
                entity,
                counts,
                warnings,
            };
            sink.fail(id, &err);
        }
    }
}

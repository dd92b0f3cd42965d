use super::SqliteStore;
use super::codec::{
    OBSERVATION_COLUMNS, SUMMARY_COLUMNS, conflict_on_unique, encode_provenance,
    observation_from_row, summary_from_row,
};
use super::filters;
use crate::error::{MemoryError, Result};
use crate::model::{
    Observation, ObservationDraft, REDACTED_TOMBSTONE, Scope, Timestamp, truncate_chars,
    validate_observation,
};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;

/// Filter for [`SqliteStore::query_observations`]. Both bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct ObservationQuery {
    pub scope: Scope,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub limit: Option<usize>,
    pub include_redacted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Observation,
    Summary,
}

/// Display-ready excerpt of an observation or summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSnippet {
    pub id: String,
    pub source: EvidenceSource,
    pub text: String,
    pub redacted: bool,
}

pub(super) async fn insert_observation_row(
    conn: &mut SqliteConnection,
    observation: &Observation,
) -> Result<()> {
    let provenance = encode_provenance(&observation.provenance)?;
    sqlx::query(
        "INSERT INTO observations
            (id, kind, content, provenance, timestamp, session_id, repo_id, agent_id, user_id, redacted)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(&observation.id)
    .bind(observation.kind.as_str())
    .bind(&observation.content)
    .bind(provenance)
    .bind(observation.timestamp)
    .bind(&observation.scope.session_id)
    .bind(&observation.scope.repo_id)
    .bind(&observation.scope.agent_id)
    .bind(&observation.scope.user_id)
    .bind(observation.redacted)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, |_| format!("observation {} already exists", observation.id)))?;
    Ok(())
}

pub(super) async fn observation_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM observations WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

impl SqliteStore {
    /// Validate and persist one observation.
    pub async fn insert_observation(&self, draft: ObservationDraft) -> Result<Observation> {
        let observation = validate_observation(draft)?;
        let mut conn = self.pool.acquire().await?;
        insert_observation_row(&mut conn, &observation).await?;
        tracing::debug!(id = %observation.id, kind = %observation.kind, "observation stored");
        Ok(observation)
    }

    pub async fn get_observation_by_id(&self, id: &str) -> Result<Option<Observation>> {
        let row = sqlx::query(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations o WHERE o.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(observation_from_row).transpose()
    }

    /// Newest first; ties broken by id.
    pub async fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations o WHERE 1 = 1"
        ));
        filters::push_scope_eq(&mut qb, "o", &query.scope);
        if !query.include_redacted {
            qb.push(" AND o.redacted = 0");
        }
        if let Some(from) = query.from {
            qb.push(" AND o.timestamp >= ").push_bind(from);
        }
        if let Some(to) = query.to {
            qb.push(" AND o.timestamp <= ").push_bind(to);
        }
        qb.push(" ORDER BY o.timestamp DESC, o.id ASC");
        filters::push_limit(&mut qb, query.limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(observation_from_row).collect()
    }

    /// Replace content with the tombstone and drop provenance. Repeat calls
    /// leave the row unchanged.
    pub async fn redact_observation(&self, id: &str) -> Result<Observation> {
        let result = sqlx::query(
            "UPDATE observations
             SET content = $1, provenance = '{}', redacted = 1
             WHERE id = $2",
        )
        .bind(REDACTED_TOMBSTONE)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MemoryError::not_found("observation", id));
        }
        tracing::info!(id, "observation redacted");

        self.get_observation_by_id(id)
            .await?
            .ok_or_else(|| MemoryError::not_found("observation", id))
    }

    /// Resolve ids against observations and summaries, keeping input order.
    /// Unknown ids are skipped; redacted rows yield the tombstone as-is.
    pub async fn get_evidence_snippets(
        &self,
        ids: &[String],
        max_chars: usize,
    ) -> Result<Vec<EvidenceSnippet>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations o WHERE 1 = 1"
        ));
        filters::push_id_list(&mut qb, "o", ids);
        let observation_rows = qb.build().fetch_all(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries s WHERE 1 = 1"
        ));
        filters::push_id_list(&mut qb, "s", ids);
        let summary_rows = qb.build().fetch_all(&self.pool).await?;

        let mut found: HashMap<String, EvidenceSnippet> = HashMap::new();
        for row in &observation_rows {
            let observation = observation_from_row(row)?;
            let text = if observation.redacted {
                REDACTED_TOMBSTONE.to_string()
            } else {
                truncate_chars(observation.content.as_deref().unwrap_or_default(), max_chars)
            };
            found.insert(
                observation.id.clone(),
                EvidenceSnippet {
                    id: observation.id,
                    source: EvidenceSource::Observation,
                    text,
                    redacted: observation.redacted,
                },
            );
        }
        for row in &summary_rows {
            let summary = summary_from_row(row)?;
            found.entry(summary.id.clone()).or_insert(EvidenceSnippet {
                text: truncate_chars(&summary.content, max_chars),
                id: summary.id,
                source: EvidenceSource::Summary,
                redacted: false,
            });
        }

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }
}

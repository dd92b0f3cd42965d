use super::SqliteStore;
use super::codec::{SUMMARY_COLUMNS, conflict_on_unique, encode_evidence, summary_from_row};
use crate::error::{MemoryError, Result};
use crate::model::{Summary, SummaryDraft, validate_summary};
use sqlx::SqliteConnection;

/// Insert a summary, copying scope columns from its capsule so scoped
/// full-text queries never need a join. Missing capsule is `NotFound`.
pub(super) async fn insert_summary_row(conn: &mut SqliteConnection, summary: &Summary) -> Result<()> {
    let evidence = encode_evidence(&summary.evidence_refs)?;
    let result = sqlx::query(
        "INSERT INTO summaries
            (id, capsule_id, content, confidence, created_at, evidence_refs,
             session_id, repo_id, agent_id, user_id)
         SELECT $1, c.id, $2, $3, $4, $5, c.session_id, c.repo_id, c.agent_id, c.user_id
         FROM capsules c WHERE c.id = $6",
    )
    .bind(&summary.id)
    .bind(&summary.content)
    .bind(summary.confidence)
    .bind(summary.created_at)
    .bind(evidence)
    .bind(&summary.capsule_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_on_unique(e, |_| format!("summary {} already exists", summary.id)))?;

    if result.rows_affected() == 0 {
        return Err(MemoryError::not_found("capsule", summary.capsule_id.as_str()));
    }
    Ok(())
}

pub(super) async fn summary_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM summaries WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

impl SqliteStore {
    /// Validate and persist a summary for an existing capsule.
    pub async fn insert_summary(&self, draft: SummaryDraft) -> Result<Summary> {
        let summary = validate_summary(draft)?;
        let mut conn = self.pool.acquire().await?;
        insert_summary_row(&mut conn, &summary).await?;
        tracing::debug!(id = %summary.id, capsule_id = %summary.capsule_id, "summary stored");
        Ok(summary)
    }

    pub async fn get_summary_by_id(&self, id: &str) -> Result<Option<Summary>> {
        let row = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries s WHERE s.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    /// Most recent summary by `createdAt`, ties broken by descending id.
    pub async fn get_latest_summary_for_capsule(&self, capsule_id: &str) -> Result<Option<Summary>> {
        let row = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries s
             WHERE s.capsule_id = $1
             ORDER BY s.created_at DESC, s.id DESC
             LIMIT 1"
        ))
        .bind(capsule_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(summary_from_row).transpose()
    }

    /// All summaries of a capsule, oldest first.
    pub async fn list_summaries_for_capsule(&self, capsule_id: &str) -> Result<Vec<Summary>> {
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries s
             WHERE s.capsule_id = $1
             ORDER BY s.created_at ASC, s.id ASC"
        ))
        .bind(capsule_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(summary_from_row).collect()
    }
}

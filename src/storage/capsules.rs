use super::SqliteStore;
use super::codec::{CAPSULE_COLUMNS, capsule_from_row, conflict_on_unique};
use super::observations::{insert_observation_row, observation_exists};
use super::summaries::insert_summary_row;
use crate::error::{MemoryError, Result};
use crate::model::{
    Capsule, CapsuleDraft, CapsuleStatus, Observation, ObservationDraft, Summary, SummaryDraft,
    Timestamp, validate_capsule, validate_observation, validate_summary,
};
use sqlx::SqliteConnection;
use std::collections::HashMap;

/// Result of [`SqliteStore::close_capsule_with_summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedCapsule {
    pub capsule: Capsule,
    pub summary: Option<Summary>,
}

pub(super) async fn insert_capsule_row(conn: &mut SqliteConnection, capsule: &Capsule) -> Result<()> {
    sqlx::query(
        "INSERT INTO capsules
            (id, capsule_type, intent, status, session_id, repo_id, agent_id, user_id, opened_at, closed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(&capsule.id)
    .bind(capsule.capsule_type.as_str())
    .bind(&capsule.intent)
    .bind(capsule.status.as_str())
    .bind(&capsule.scope.session_id)
    .bind(&capsule.scope.repo_id)
    .bind(&capsule.scope.agent_id)
    .bind(&capsule.scope.user_id)
    .bind(capsule.opened_at)
    .bind(capsule.closed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        conflict_on_unique(e, |message| {
            if message.contains("session_id") {
                format!(
                    "session {} already has an open capsule",
                    capsule.scope.session_id.as_deref().unwrap_or_default()
                )
            } else {
                format!("capsule {} already exists", capsule.id)
            }
        })
    })?;

    for (seq, observation_id) in capsule.observation_ids.iter().enumerate() {
        let seq = i64::try_from(seq).map_err(anyhow::Error::from)?;
        sqlx::query(
            "INSERT INTO capsule_observations (capsule_id, observation_id, seq) VALUES ($1, $2, $3)",
        )
        .bind(&capsule.id)
        .bind(observation_id)
        .bind(seq)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            conflict_on_unique(e, |_| {
                format!("observation {observation_id} listed twice in capsule {}", capsule.id)
            })
        })?;
    }
    Ok(())
}

/// Append `observation_id` to the capsule's sequence and return its seq.
async fn attach_row(
    conn: &mut SqliteConnection,
    capsule_id: &str,
    observation_id: &str,
) -> Result<i64> {
    let status: Option<(String,)> = sqlx::query_as("SELECT status FROM capsules WHERE id = $1")
        .bind(capsule_id)
        .fetch_optional(&mut *conn)
        .await?;
    match status {
        None => return Err(MemoryError::not_found("capsule", capsule_id)),
        Some((status,)) if status != CapsuleStatus::Open.as_str() => {
            return Err(MemoryError::Conflict(format!(
                "capsule {capsule_id} is closed"
            )));
        }
        Some(_) => {}
    }
    if !observation_exists(conn, observation_id).await? {
        return Err(MemoryError::not_found("observation", observation_id));
    }

    let (seq,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(seq) + 1, 0) FROM capsule_observations WHERE capsule_id = $1",
    )
    .bind(capsule_id)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO capsule_observations (capsule_id, observation_id, seq) VALUES ($1, $2, $3)",
    )
    .bind(capsule_id)
    .bind(observation_id)
    .bind(seq)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        conflict_on_unique(e, |_| {
            format!("observation {observation_id} already attached to capsule {capsule_id}")
        })
    })?;
    Ok(seq)
}

pub(super) async fn capsule_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM capsules WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Ordered observation ids for every capsule that has any.
pub(super) async fn observation_ids_by_capsule(
    conn: &mut SqliteConnection,
) -> Result<HashMap<String, Vec<String>>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT capsule_id, observation_id FROM capsule_observations ORDER BY capsule_id, seq",
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (capsule_id, observation_id) in rows {
        grouped.entry(capsule_id).or_default().push(observation_id);
    }
    Ok(grouped)
}

impl SqliteStore {
    /// Validate and persist a new open capsule.
    ///
    /// A second open session capsule for the same `sessionId` is a
    /// `Conflict`.
    pub async fn create_capsule(&self, draft: CapsuleDraft) -> Result<Capsule> {
        let capsule = validate_capsule(draft)?;
        let mut conn = self.pool.acquire().await?;
        insert_capsule_row(&mut conn, &capsule).await?;
        tracing::debug!(id = %capsule.id, capsule_type = %capsule.capsule_type, "capsule created");
        Ok(capsule)
    }

    pub async fn get_capsule_by_id(&self, id: &str) -> Result<Option<Capsule>> {
        let mut conn = self.pool.acquire().await?;
        load_capsule(&mut conn, id).await
    }

    pub async fn get_open_capsule_for_session(&self, session_id: &str) -> Result<Option<Capsule>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules c
             WHERE c.capsule_type = 'session' AND c.status = 'open' AND c.session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut capsule = capsule_from_row(&row)?;
        capsule.observation_ids = load_observation_ids(&mut conn, &capsule.id).await?;
        Ok(Some(capsule))
    }

    /// Every open capsule, oldest first.
    pub async fn list_open_capsules(&self) -> Result<Vec<Capsule>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&format!(
            "SELECT {CAPSULE_COLUMNS} FROM capsules c
             WHERE c.status = 'open'
             ORDER BY c.opened_at ASC, c.id ASC"
        ))
        .fetch_all(&mut *conn)
        .await?;

        let mut capsules = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut capsule = capsule_from_row(row)?;
            capsule.observation_ids = load_observation_ids(&mut conn, &capsule.id).await?;
            capsules.push(capsule);
        }
        Ok(capsules)
    }

    /// Transition an open capsule to closed.
    pub async fn close_capsule(&self, id: &str, closed_at: Timestamp) -> Result<Capsule> {
        Ok(self.close_capsule_with_summary(id, closed_at, None).await?.capsule)
    }

    /// Close the capsule and, when given, store its summary in the same
    /// transaction. The draft's `capsule_id` is overwritten with `id`; a
    /// draft without `evidence_refs` cites every observation attached to the
    /// capsule at commit time.
    pub async fn close_capsule_with_summary(
        &self,
        id: &str,
        closed_at: Timestamp,
        summary: Option<SummaryDraft>,
    ) -> Result<ClosedCapsule> {
        let cite_attached = summary.as_ref().is_some_and(|draft| draft.evidence_refs.is_none());
        let mut summary = summary
            .map(|mut draft| {
                draft.capsule_id = id.to_string();
                validate_summary(draft)
            })
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE capsules SET status = 'closed', closed_at = $1
             WHERE id = $2 AND status = 'open'",
        )
        .bind(closed_at)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MemoryError::NotFoundOrAlreadyClosed(id.to_string()));
        }
        let capsule = load_capsule(&mut tx, id)
            .await?
            .ok_or_else(|| MemoryError::not_found("capsule", id))?;
        if let Some(summary) = &mut summary {
            if cite_attached {
                summary.evidence_refs.clone_from(&capsule.observation_ids);
            }
            insert_summary_row(&mut tx, summary).await?;
        }
        tx.commit().await?;

        tracing::info!(id, has_summary = summary.is_some(), "capsule closed");
        Ok(ClosedCapsule { capsule, summary })
    }

    /// Append an existing observation to an open capsule.
    pub async fn attach_observation_to_capsule(
        &self,
        capsule_id: &str,
        observation_id: &str,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let seq = attach_row(&mut tx, capsule_id, observation_id).await?;
        tx.commit().await?;
        tracing::debug!(capsule_id, observation_id, seq, "observation attached");
        Ok(seq)
    }

    /// Insert an observation and attach it to `capsule_id` atomically.
    pub async fn record_observation(
        &self,
        capsule_id: &str,
        draft: ObservationDraft,
    ) -> Result<Observation> {
        let observation = validate_observation(draft)?;
        let mut tx = self.pool.begin().await?;
        insert_observation_row(&mut tx, &observation).await?;
        let seq = attach_row(&mut tx, capsule_id, &observation.id).await?;
        tx.commit().await?;
        tracing::debug!(capsule_id, id = %observation.id, seq, "observation recorded");
        Ok(observation)
    }
}

async fn load_observation_ids(conn: &mut SqliteConnection, capsule_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT observation_id FROM capsule_observations WHERE capsule_id = $1 ORDER BY seq",
    )
    .bind(capsule_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

async fn load_capsule(conn: &mut SqliteConnection, id: &str) -> Result<Option<Capsule>> {
    let row = sqlx::query(&format!(
        "SELECT {CAPSULE_COLUMNS} FROM capsules c WHERE c.id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut capsule = capsule_from_row(&row)?;
    capsule.observation_ids = load_observation_ids(conn, id).await?;
    Ok(Some(capsule))
}

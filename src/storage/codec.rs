//! Row <-> entity mapping. Enum columns hold the canonical `as_str()` form.

use crate::error::MemoryError;
use crate::model::{
    Capsule, CapsuleStatus, CapsuleType, Observation, ObservationKind, Pin, PinTargetType,
    Provenance, Scope, Summary,
};
use anyhow::Context;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

pub(super) const OBSERVATION_COLUMNS: &str = "o.id, o.kind, o.content, o.provenance, o.timestamp, \
     o.session_id, o.repo_id, o.agent_id, o.user_id, o.redacted";

pub(super) const CAPSULE_COLUMNS: &str = "c.id, c.capsule_type, c.intent, c.status, \
     c.session_id, c.repo_id, c.agent_id, c.user_id, c.opened_at, c.closed_at";

pub(super) const SUMMARY_COLUMNS: &str =
    "s.id, s.capsule_id, s.content, s.confidence, s.created_at, s.evidence_refs";

pub(super) const PIN_COLUMNS: &str = "p.id, p.target_type, p.target_id, p.reason, p.created_at, \
     p.expires_at, p.session_id, p.repo_id, p.agent_id, p.user_id";

fn scope_from_row(row: &SqliteRow) -> anyhow::Result<Scope> {
    Ok(Scope {
        session_id: row.try_get("session_id")?,
        repo_id: row.try_get("repo_id")?,
        agent_id: row.try_get("agent_id")?,
        user_id: row.try_get("user_id")?,
    })
}

fn decode_observation(row: &SqliteRow) -> anyhow::Result<Observation> {
    let kind_raw: String = row.try_get("kind")?;
    let provenance_raw: String = row.try_get("provenance")?;
    Ok(Observation {
        id: row.try_get("id")?,
        kind: kind_raw
            .parse::<ObservationKind>()
            .with_context(|| format!("unknown observation kind: {kind_raw}"))?,
        content: row.try_get("content")?,
        provenance: serde_json::from_str::<Provenance>(&provenance_raw)
            .context("deserialize observation provenance")?,
        timestamp: row.try_get("timestamp")?,
        scope: scope_from_row(row)?,
        redacted: row.try_get("redacted")?,
    })
}

fn decode_capsule(row: &SqliteRow) -> anyhow::Result<Capsule> {
    let type_raw: String = row.try_get("capsule_type")?;
    let status_raw: String = row.try_get("status")?;
    Ok(Capsule {
        id: row.try_get("id")?,
        capsule_type: type_raw
            .parse::<CapsuleType>()
            .with_context(|| format!("unknown capsule type: {type_raw}"))?,
        intent: row.try_get("intent")?,
        status: status_raw
            .parse::<CapsuleStatus>()
            .with_context(|| format!("unknown capsule status: {status_raw}"))?,
        scope: scope_from_row(row)?,
        opened_at: row.try_get("opened_at")?,
        closed_at: row.try_get("closed_at")?,
        observation_ids: Vec::new(),
    })
}

fn decode_summary(row: &SqliteRow) -> anyhow::Result<Summary> {
    let evidence_raw: String = row.try_get("evidence_refs")?;
    Ok(Summary {
        id: row.try_get("id")?,
        capsule_id: row.try_get("capsule_id")?,
        content: row.try_get("content")?,
        confidence: row.try_get("confidence")?,
        created_at: row.try_get("created_at")?,
        evidence_refs: serde_json::from_str(&evidence_raw)
            .context("deserialize summary evidence refs")?,
    })
}

fn decode_pin(row: &SqliteRow) -> anyhow::Result<Pin> {
    let target_raw: String = row.try_get("target_type")?;
    Ok(Pin {
        id: row.try_get("id")?,
        target_type: target_raw
            .parse::<PinTargetType>()
            .with_context(|| format!("unknown pin target type: {target_raw}"))?,
        target_id: row.try_get("target_id")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        scope: scope_from_row(row)?,
    })
}

pub(super) fn observation_from_row(row: &SqliteRow) -> Result<Observation, MemoryError> {
    decode_observation(row).map_err(MemoryError::from)
}

pub(super) fn capsule_from_row(row: &SqliteRow) -> Result<Capsule, MemoryError> {
    decode_capsule(row).map_err(MemoryError::from)
}

pub(super) fn summary_from_row(row: &SqliteRow) -> Result<Summary, MemoryError> {
    decode_summary(row).map_err(MemoryError::from)
}

pub(super) fn pin_from_row(row: &SqliteRow) -> Result<Pin, MemoryError> {
    decode_pin(row).map_err(MemoryError::from)
}

pub(super) fn encode_provenance(provenance: &Provenance) -> Result<String, MemoryError> {
    serde_json::to_string(provenance)
        .context("serialize observation provenance")
        .map_err(MemoryError::from)
}

pub(super) fn encode_evidence(refs: &[String]) -> Result<String, MemoryError> {
    serde_json::to_string(refs)
        .context("serialize summary evidence refs")
        .map_err(MemoryError::from)
}

/// Unique-constraint failures become `Conflict`; everything else stays a
/// database error.
pub(super) fn conflict_on_unique(err: sqlx::Error, message: impl FnOnce(&str) -> String) -> MemoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            MemoryError::Conflict(message(db.message()))
        }
        _ => MemoryError::Database(err),
    }
}

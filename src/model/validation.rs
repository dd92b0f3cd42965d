//! Field-level validation for every entity.
//!
//! Validators never stop at the first problem: each one walks every field
//! and returns the full list of [`FieldViolation`]s so a caller can report
//! everything wrong with an input at once.

use super::types::{
    Capsule, CapsuleDraft, CapsuleStatus, CapsuleType, DEFAULT_SUMMARY_CONFIDENCE, Observation,
    ObservationDraft, ObservationKind, Pin, PinDraft, PinTargetType, Provenance, Scope, Summary,
    SummaryDraft, Timestamp, now_millis,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_SCOPE_VALUE_LEN: usize = 256;
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;
pub const MAX_INTENT_LEN: usize = 4096;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_PROVENANCE_BYTES: usize = 64 * 1024;
pub const MAX_PROVENANCE_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value,
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {} (got {value})", self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// Every violation found while validating one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Default)]
struct Collector {
    violations: Vec<FieldViolation>,
}

impl Collector {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>, value: Option<Value>) {
        self.violations
            .push(FieldViolation::new(field, message, value));
    }

    fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.violations.is_empty() {
            Ok(value)
        } else {
            Err(ValidationErrors::new(self.violations))
        }
    }

    fn text(&mut self, field: &str, raw: &str, max_len: usize) {
        if raw.trim().is_empty() {
            self.push(field, "must not be empty", Some(Value::from(raw)));
        } else if raw.len() > max_len {
            self.push(
                field,
                format!("must be <= {max_len} bytes"),
                Some(Value::from(raw.len())),
            );
        }
    }

    fn optional_text(&mut self, field: &str, raw: Option<&str>, max_len: usize) {
        if let Some(raw) = raw {
            self.text(field, raw, max_len);
        }
    }

    fn timestamp(&mut self, field: &str, value: Timestamp) {
        if value < 0 {
            self.push(field, "must be >= 0", Some(Value::from(value)));
        }
    }

    fn scope(&mut self, scope: &Scope) {
        for (dimension, value) in scope.dimensions() {
            let field = format!("scope.{}", dimension.field());
            self.optional_text(&field, value, MAX_SCOPE_VALUE_LEN);
        }
    }

    fn provenance(&mut self, provenance: &Provenance) {
        let depth = provenance
            .values()
            .map(|value| value.depth() + 1)
            .max()
            .unwrap_or(0);
        if depth > MAX_PROVENANCE_DEPTH {
            self.push(
                "provenance",
                format!("nesting must be <= {MAX_PROVENANCE_DEPTH} levels"),
                Some(Value::from(depth)),
            );
        }
        if provenance.keys().any(|key| key.trim().is_empty()) {
            self.push("provenance", "keys must not be empty", None);
        }
        match serde_json::to_vec(provenance) {
            Ok(encoded) if encoded.len() > MAX_PROVENANCE_BYTES => self.push(
                "provenance",
                format!("must serialize to <= {MAX_PROVENANCE_BYTES} bytes"),
                Some(Value::from(encoded.len())),
            ),
            Ok(_) => {}
            Err(e) => self.push("provenance", format!("is not serializable: {e}"), None),
        }
    }

    fn confidence(&mut self, value: f64) {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            self.push(
                "confidence",
                "must be a finite number in [0, 1]",
                serde_json::Number::from_f64(value).map(Value::Number),
            );
        }
    }

    fn id(&mut self, field: &str, raw: Option<String>) -> String {
        match raw {
            Some(raw) => {
                self.text(field, &raw, MAX_ID_LEN);
                raw.trim().to_string()
            }
            None => Uuid::new_v4().to_string(),
        }
    }

    fn enum_value<T: std::str::FromStr>(&mut self, field: &str, raw: &str, expected: &str) -> Option<T> {
        if let Ok(parsed) = raw.trim().parse::<T>() {
            Some(parsed)
        } else {
            self.push(
                field,
                format!("must be one of {expected}"),
                Some(Value::from(raw)),
            );
            None
        }
    }
}

const OBSERVATION_KINDS: &str = "tool_call, command, file_diff, error, message, node_start, node_end, node_output, node_error";

// ── Draft validators ─────────────────────────────────────────

pub fn validate_observation(draft: ObservationDraft) -> Result<Observation, ValidationErrors> {
    let mut c = Collector::default();
    let id = c.id("id", draft.id);
    let kind = c.enum_value::<ObservationKind>("kind", &draft.kind, OBSERVATION_KINDS);
    match draft.content.as_deref() {
        Some(content) => c.text("content", content, MAX_CONTENT_BYTES),
        None => c.push("content", "is required", None),
    }
    let timestamp = draft.timestamp.unwrap_or_else(now_millis);
    c.timestamp("timestamp", timestamp);
    c.scope(&draft.scope);
    let provenance = draft.provenance.unwrap_or_default();
    c.provenance(&provenance);

    let Some(kind) = kind else {
        return Err(ValidationErrors::new(c.violations));
    };
    c.finish(Observation {
        id,
        kind,
        content: draft.content,
        provenance,
        timestamp,
        scope: draft.scope,
        redacted: false,
    })
}

pub fn validate_capsule(draft: CapsuleDraft) -> Result<Capsule, ValidationErrors> {
    let mut c = Collector::default();
    let id = c.id("id", draft.id);
    let capsule_type =
        c.enum_value::<CapsuleType>("type", &draft.capsule_type, "session, workflow-node");
    c.text("intent", &draft.intent, MAX_INTENT_LEN);
    c.scope(&draft.scope);
    if capsule_type == Some(CapsuleType::Session) && draft.scope.session_id.is_none() {
        c.push(
            "scope.sessionId",
            "is required for session capsules",
            None,
        );
    }
    let opened_at = draft.opened_at.unwrap_or_else(now_millis);
    c.timestamp("openedAt", opened_at);

    let Some(capsule_type) = capsule_type else {
        return Err(ValidationErrors::new(c.violations));
    };
    c.finish(Capsule {
        id,
        capsule_type,
        intent: draft.intent.trim().to_string(),
        status: CapsuleStatus::Open,
        scope: draft.scope,
        opened_at,
        closed_at: None,
        observation_ids: Vec::new(),
    })
}

pub fn validate_summary(draft: SummaryDraft) -> Result<Summary, ValidationErrors> {
    let mut c = Collector::default();
    let id = c.id("id", draft.id);
    c.text("capsuleId", &draft.capsule_id, MAX_ID_LEN);
    c.text("content", &draft.content, MAX_CONTENT_BYTES);
    let confidence = draft.confidence.unwrap_or(DEFAULT_SUMMARY_CONFIDENCE);
    c.confidence(confidence);
    let created_at = draft.created_at.unwrap_or_else(now_millis);
    c.timestamp("createdAt", created_at);
    let evidence_refs = draft.evidence_refs.unwrap_or_default();
    for (i, evidence) in evidence_refs.iter().enumerate() {
        c.text(&format!("evidenceRefs[{i}]"), evidence, MAX_ID_LEN);
    }

    c.finish(Summary {
        id,
        capsule_id: draft.capsule_id.trim().to_string(),
        content: draft.content,
        confidence,
        created_at,
        evidence_refs,
    })
}

pub fn validate_pin(draft: PinDraft) -> Result<Pin, ValidationErrors> {
    let mut c = Collector::default();
    let id = c.id("id", draft.id);
    let target_type =
        c.enum_value::<PinTargetType>("targetType", &draft.target_type, "observation, summary");
    c.text("targetId", &draft.target_id, MAX_ID_LEN);
    c.optional_text("reason", draft.reason.as_deref(), MAX_REASON_LEN);
    let created_at = draft.created_at.unwrap_or_else(now_millis);
    c.timestamp("createdAt", created_at);
    if let Some(expires_at) = draft.expires_at {
        c.timestamp("expiresAt", expires_at);
    }
    c.scope(&draft.scope);

    let Some(target_type) = target_type else {
        return Err(ValidationErrors::new(c.violations));
    };
    c.finish(Pin {
        id,
        target_type,
        target_id: draft.target_id.trim().to_string(),
        reason: draft.reason.map(|reason| reason.trim().to_string()),
        created_at,
        expires_at: draft.expires_at,
        scope: draft.scope,
    })
}

// ── Typed-entity audits (import path) ────────────────────────

pub fn check_observation(observation: &Observation) -> Result<(), ValidationErrors> {
    let mut c = Collector::default();
    c.text("id", &observation.id, MAX_ID_LEN);
    match (observation.redacted, observation.content.as_deref()) {
        (false, Some(content)) => c.text("content", content, MAX_CONTENT_BYTES),
        (false, None) => c.push("content", "is required unless redacted", None),
        (true, _) => {}
    }
    c.timestamp("timestamp", observation.timestamp);
    c.scope(&observation.scope);
    c.provenance(&observation.provenance);
    c.finish(())
}

pub fn check_capsule(capsule: &Capsule) -> Result<(), ValidationErrors> {
    let mut c = Collector::default();
    c.text("id", &capsule.id, MAX_ID_LEN);
    c.text("intent", &capsule.intent, MAX_INTENT_LEN);
    c.scope(&capsule.scope);
    c.timestamp("openedAt", capsule.opened_at);
    match (capsule.status, capsule.closed_at) {
        (CapsuleStatus::Open, Some(_)) => {
            c.push("closedAt", "must be absent while the capsule is open", None);
        }
        (CapsuleStatus::Closed, None) => {
            c.push("closedAt", "is required once the capsule is closed", None);
        }
        (CapsuleStatus::Closed, Some(closed_at)) => c.timestamp("closedAt", closed_at),
        (CapsuleStatus::Open, None) => {}
    }
    for (i, id) in capsule.observation_ids.iter().enumerate() {
        c.text(&format!("observationIds[{i}]"), id, MAX_ID_LEN);
    }
    c.finish(())
}

pub fn check_summary(summary: &Summary) -> Result<(), ValidationErrors> {
    let mut c = Collector::default();
    c.text("id", &summary.id, MAX_ID_LEN);
    c.text("capsuleId", &summary.capsule_id, MAX_ID_LEN);
    c.text("content", &summary.content, MAX_CONTENT_BYTES);
    c.confidence(summary.confidence);
    c.timestamp("createdAt", summary.created_at);
    c.finish(())
}

pub fn check_pin(pin: &Pin) -> Result<(), ValidationErrors> {
    let mut c = Collector::default();
    c.text("id", &pin.id, MAX_ID_LEN);
    c.text("targetId", &pin.target_id, MAX_ID_LEN);
    c.optional_text("reason", pin.reason.as_deref(), MAX_REASON_LEN);
    c.timestamp("createdAt", pin.created_at);
    if let Some(expires_at) = pin.expires_at {
        c.timestamp("expiresAt", expires_at);
    }
    c.scope(&pin.scope);
    c.finish(())
}

use chrono::Utc;
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Content written over a redacted observation.
pub const REDACTED_TOMBSTONE: &str = "[REDACTED]";

/// Confidence stamped on a summary when the caller does not supply one.
pub const DEFAULT_SUMMARY_CONFIDENCE: f64 = 0.8;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

// ── Closed enums ─────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ObservationKind {
    ToolCall,
    Command,
    FileDiff,
    Error,
    Message,
    NodeStart,
    NodeEnd,
    NodeOutput,
    NodeError,
}

impl ObservationKind {
    pub const ALL: [Self; 9] = [
        Self::ToolCall,
        Self::Command,
        Self::FileDiff,
        Self::Error,
        Self::Message,
        Self::NodeStart,
        Self::NodeEnd,
        Self::NodeOutput,
        Self::NodeError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::Command => "command",
            Self::FileDiff => "file_diff",
            Self::Error => "error",
            Self::Message => "message",
            Self::NodeStart => "node_start",
            Self::NodeEnd => "node_end",
            Self::NodeOutput => "node_output",
            Self::NodeError => "node_error",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum CapsuleType {
    #[serde(rename = "session")]
    #[strum(serialize = "session")]
    Session,
    #[serde(rename = "workflow-node")]
    #[strum(serialize = "workflow-node")]
    WorkflowNode,
}

impl CapsuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::WorkflowNode => "workflow-node",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CapsuleStatus {
    Open,
    Closed,
}

impl CapsuleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PinTargetType {
    Observation,
    Summary,
}

impl PinTargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Summary => "summary",
        }
    }
}

// ── Scope ────────────────────────────────────────────────────

/// Identifying dimensions used to filter and partition entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One column of a [`Scope`]. Column names are fixed here so scoped SQL
/// never splices caller-provided text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDimension {
    Session,
    Repo,
    Agent,
    User,
}

impl ScopeDimension {
    pub fn column(self) -> &'static str {
        match self {
            Self::Session => "session_id",
            Self::Repo => "repo_id",
            Self::Agent => "agent_id",
            Self::User => "user_id",
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            Self::Session => "sessionId",
            Self::Repo => "repoId",
            Self::Agent => "agentId",
            Self::User => "userId",
        }
    }
}

impl Scope {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_repo(mut self, repo_id: impl Into<String>) -> Self {
        self.repo_id = Some(repo_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions().iter().all(|(_, value)| value.is_none())
    }

    pub fn dimensions(&self) -> [(ScopeDimension, Option<&str>); 4] {
        [
            (ScopeDimension::Session, self.session_id.as_deref()),
            (ScopeDimension::Repo, self.repo_id.as_deref()),
            (ScopeDimension::Agent, self.agent_id.as_deref()),
            (ScopeDimension::User, self.user_id.as_deref()),
        ]
    }

    /// True when every dimension set on `self` equals the same dimension
    /// on `other`. An empty scope matches everything.
    pub fn matches(&self, other: &Scope) -> bool {
        self.dimensions()
            .iter()
            .zip(other.dimensions().iter())
            .all(|((_, wanted), (_, actual))| wanted.is_none() || wanted == actual)
    }
}

// ── Provenance ───────────────────────────────────────────────

/// Opaque adapter metadata, kept in the order the adapter wrote it.
pub type Provenance = IndexMap<String, ProvenanceValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvenanceValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<ProvenanceValue>),
    Map(IndexMap<String, ProvenanceValue>),
}

impl ProvenanceValue {
    /// Nesting depth; scalars are depth 0.
    pub fn depth(&self) -> usize {
        match self {
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) | Self::Text(_) => 0,
            Self::List(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            Self::Map(entries) => 1 + entries.values().map(Self::depth).max().unwrap_or(0),
        }
    }
}

impl From<&str> for ProvenanceValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ProvenanceValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ProvenanceValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for ProvenanceValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// ── Entities ─────────────────────────────────────────────────

/// One captured fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: String,
    pub kind: ObservationKind,
    pub content: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub redacted: bool,
}

/// A bounded unit of agent work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
    pub id: String,
    #[serde(rename = "type")]
    pub capsule_type: CapsuleType,
    pub intent: String,
    pub status: CapsuleStatus,
    #[serde(default)]
    pub scope: Scope,
    pub opened_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
    #[serde(default)]
    pub observation_ids: Vec<String>,
}

impl Capsule {
    pub fn is_open(&self) -> bool {
        self.status == CapsuleStatus::Open
    }
}

/// Confidence-scored synopsis of a capsule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: String,
    pub capsule_id: String,
    pub content: String,
    pub confidence: f64,
    pub created_at: Timestamp,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
}

/// Explicit importance marker forcing tier-0 retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub id: String,
    pub target_type: PinTargetType,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub scope: Scope,
}

impl Pin {
    /// Expiry is evaluated lazily: a pin whose `expires_at <= now` is inactive.
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

// ── Drafts (unvalidated input) ───────────────────────────────

/// Raw observation input as an adapter produces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub scope: Scope,
}

impl ObservationDraft {
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_provenance(mut self, key: impl Into<String>, value: ProvenanceValue) -> Self {
        self.provenance
            .get_or_insert_with(Provenance::new)
            .insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapsuleDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub capsule_type: String,
    pub intent: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub opened_at: Option<Timestamp>,
}

impl CapsuleDraft {
    pub fn new(capsule_type: CapsuleType, intent: impl Into<String>, scope: Scope) -> Self {
        Self {
            id: None,
            capsule_type: capsule_type.as_str().to_string(),
            intent: intent.into(),
            scope,
            opened_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub capsule_id: String,
    pub content: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub evidence_refs: Option<Vec<String>>,
}

impl SummaryDraft {
    pub fn new(capsule_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            capsule_id: capsule_id.into(),
            content: content.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub target_type: String,
    pub target_id: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    #[serde(default)]
    pub scope: Scope,
}

impl PinDraft {
    pub fn new(target_type: PinTargetType, target_id: impl Into<String>) -> Self {
        Self {
            target_type: target_type.as_str().to_string(),
            target_id: target_id.into(),
            ..Self::default()
        }
    }
}

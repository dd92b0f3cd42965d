use crate::model::ValidationErrors;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `capsule-memory`.
///
/// Library callers match on these to decide recovery strategy; internal
/// plumbing keeps using `anyhow::Result` for context chains and lands in
/// [`MemoryError::Other`] at the boundary.
#[derive(Debug, Error)]
pub enum MemoryError {
    // ── Validation ──────────────────────────────────────────────────────
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    // ── Lookup ──────────────────────────────────────────────────────────
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("capsule not found or already closed: {0}")]
    NotFoundOrAlreadyClosed(String),

    // ── Invariants ──────────────────────────────────────────────────────
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported dataset version {found} (expected {expected})")]
    VersionMismatch { expected: String, found: String },

    #[error("unsupported scope lookup: {0}")]
    UnsupportedScope(String),

    // ── Search ──────────────────────────────────────────────────────────
    #[error("malformed search query: {0}")]
    QuerySyntax(String),

    // ── Export / import bundles ─────────────────────────────────────────
    #[error("bundle: {0}")]
    Bundle(#[from] BundleError),

    // ── Storage ─────────────────────────────────────────────────────────
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MemoryError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True for errors a caller can fix by correcting input and retrying.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotFoundOrAlreadyClosed(_))
    }
}

// ─── Bundle errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("malformed bundle json: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("invalid bundle: {}", .0.join("; "))]
    InvalidBundle(Vec<String>),

    #[error("merge requires at least one bundle")]
    EmptyMerge,
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, MemoryError>;

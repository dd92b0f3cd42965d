pub mod text;
pub mod types;
pub mod validation;

pub use text::{ELLIPSIS, estimate_tokens, truncate_chars};
pub use types::{
    Capsule, CapsuleDraft, CapsuleStatus, CapsuleType, DEFAULT_SUMMARY_CONFIDENCE, Observation,
    ObservationDraft, ObservationKind, Pin, PinDraft, PinTargetType, Provenance, ProvenanceValue,
    REDACTED_TOMBSTONE, Scope, ScopeDimension, Summary, SummaryDraft, Timestamp, now_millis,
};
pub use validation::{
    FieldViolation, ValidationErrors, check_capsule, check_observation, check_pin, check_summary,
    validate_capsule, validate_observation, validate_pin, validate_summary,
};

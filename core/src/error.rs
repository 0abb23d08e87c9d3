use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::content::ContentError;
use crate::executor::ExecError;
use crate::llm::LlmError;
use crate::model::SessionStatus;
use crate::sandbox::SandboxError;
use crate::store::StoreError;

/// Structured error response returned by every failing endpoint.
/// Carries enough detail for a client to correct the request without
/// exposing internals.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error class (e.g. "not_found", "policy_violation")
    pub error: String,
    /// Domain-specific code for deterministic remediation (e.g. "cooldown_active")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error classes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const POLICY_VIOLATION: &str = "policy_violation";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const UPSTREAM_FAILED: &str = "upstream_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Coarse classification of a [`TutorError`], used for status mapping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller referenced something that does not exist.
    NotFound,
    /// Request was malformed.
    Validation,
    /// A policy gate or session-state precondition rejected the request.
    StateConflict,
    /// The LLM gateway, execution backend or sandbox failed.
    Upstream,
    /// Persistence or other unexpected failure.
    Internal,
}

pub const MIN_JUSTIFICATION_LEN: usize = 20;
pub const MIN_HINTS_FOR_ESCALATION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("exercise '{0}' not found")]
    ExerciseNotFound(String),

    #[error("spec '{0}' not found")]
    SpecNotFound(String),

    #[error("no pending patch for session {0}")]
    PatchNotFound(Uuid),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("session {id} is {status}, not active")]
    SessionNotActive { id: Uuid, status: SessionStatus },

    #[error("intervention cooldown active, retry in {retry_after_secs}s")]
    CooldownActive { retry_after_secs: u64 },

    #[error("escalation requires at least {need} prior hints, session has {have}")]
    InsufficientHints { have: u32, need: u32 },

    #[error("escalation level must be 4 or 5, got {0}")]
    InvalidEscalationLevel(u8),

    #[error("escalation requires a justification of at least {min_len} characters")]
    JustificationRequired { min_len: usize },

    #[error("level {requested} exceeds the '{track}' track maximum of {max}")]
    LevelExceedsPolicy { requested: u8, max: u8, track: String },

    #[error("{message}")]
    InvalidRequest {
        field: Option<String>,
        message: String,
    },

    #[error("intervention failed: {0}")]
    InterventionFailed(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("sandbox failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TutorError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        TutorError::InvalidRequest {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TutorError::SessionNotFound(_)
            | TutorError::ExerciseNotFound(_)
            | TutorError::SpecNotFound(_)
            | TutorError::PatchNotFound(_)
            | TutorError::RunNotFound(_) => ErrorKind::NotFound,
            TutorError::InvalidRequest { .. } => ErrorKind::Validation,
            TutorError::SessionNotActive { .. }
            | TutorError::CooldownActive { .. }
            | TutorError::InsufficientHints { .. }
            | TutorError::InvalidEscalationLevel(_)
            | TutorError::JustificationRequired { .. }
            | TutorError::LevelExceedsPolicy { .. } => ErrorKind::StateConflict,
            TutorError::InterventionFailed(_)
            | TutorError::ExecutionFailed(_)
            | TutorError::Sandbox(_) => ErrorKind::Upstream,
            TutorError::Storage(_) | TutorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine code for the `error_code` field.
    pub fn code(&self) -> &'static str {
        match self {
            TutorError::SessionNotFound(_) => "session_not_found",
            TutorError::ExerciseNotFound(_) => "exercise_not_found",
            TutorError::SpecNotFound(_) => "spec_not_found",
            TutorError::PatchNotFound(_) => "patch_not_found",
            TutorError::RunNotFound(_) => "run_not_found",
            TutorError::SessionNotActive { .. } => "session_not_active",
            TutorError::CooldownActive { .. } => "cooldown_active",
            TutorError::InsufficientHints { .. } => "insufficient_hints",
            TutorError::InvalidEscalationLevel(_) => "invalid_escalation_level",
            TutorError::JustificationRequired { .. } => "justification_required",
            TutorError::LevelExceedsPolicy { .. } => "level_exceeds_policy",
            TutorError::InvalidRequest { .. } => "invalid_request",
            TutorError::InterventionFailed(_) => "intervention_failed",
            TutorError::ExecutionFailed(_) => "execution_failed",
            TutorError::Sandbox(_) => "sandbox_failed",
            TutorError::Storage(_) => "storage_failed",
            TutorError::Internal(_) => "internal_error",
        }
    }
}

impl From<ExecError> for TutorError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::InvalidFileName(name) => {
                TutorError::invalid("code", format!("invalid file name '{name}'"))
            }
            ExecError::Workspace(e) => TutorError::Internal(format!("executor workspace: {e}")),
            other => TutorError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<LlmError> for TutorError {
    fn from(err: LlmError) -> Self {
        TutorError::InterventionFailed(err.to_string())
    }
}

impl From<ContentError> for TutorError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::NotFound(what) => TutorError::Internal(format!(
                "content '{what}' disappeared while loading"
            )),
            ContentError::InvalidPath(path) => {
                TutorError::invalid("spec_path", format!("invalid content path '{path}'"))
            }
            other => TutorError::Internal(other.to_string()),
        }
    }
}

//! Format/build/test contract consumed by the session manager.
//!
//! Implementations must bound their own running time: a step that exceeds its
//! budget comes back as a failed outcome, never as a hang.

use async_trait::async_trait;

use crate::model::Code;

mod local;

pub use local::{ExecutorConfig, LocalExecutor};

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid file name '{0}'")]
    InvalidFileName(String),

    #[error("failed to prepare workspace: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("failed to launch '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("no command configured for {0}")]
    NotConfigured(&'static str),

    #[error("{step} failed: {output}")]
    StepFailed { step: &'static str, output: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatOutcome {
    /// True when the snapshot is already formatted
    pub ok: bool,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutcome {
    pub ok: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestOutcome {
    pub ok: bool,
    pub output: String,
    pub duration_ms: u64,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn run_format(&self, code: &Code) -> Result<FormatOutcome, ExecError>;
    /// Returns the snapshot rewritten by the formatter.
    async fn run_format_fix(&self, code: &Code) -> Result<Code, ExecError>;
    async fn run_build(&self, code: &Code) -> Result<BuildOutcome, ExecError>;
    async fn run_tests(&self, code: &Code, flags: &[String]) -> Result<TestOutcome, ExecError>;
}

/// Reject absolute paths, parent traversal and empty names.
pub fn validate_file_name(name: &str) -> Result<(), ExecError> {
    let path = std::path::Path::new(name);
    let bad = name.trim().is_empty()
        || path.is_absolute()
        || name.starts_with('/')
        || name.starts_with('\\')
        || path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
    if bad {
        return Err(ExecError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

//! Pipeline error types

use std::time::Duration;
use thiserror::Error;

/// Errors that halt a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage's predecessor was neither selected nor previously applied
    #[error("Precondition unmet for stage '{stage}': {reason}")]
    PreconditionUnmet { stage: String, reason: String },

    /// The underlying tool failed to converge a resource
    #[error("Failed to apply {resource}: {message}")]
    ResourceApplyFailure { resource: String, message: String },

    /// A readiness target never became reachable within its budget
    #[error("{endpoint} did not become ready within {}s", timeout.as_secs())]
    ReadinessTimeout { endpoint: String, timeout: Duration },

    #[error("Run cancelled by operator")]
    Cancelled,

    #[error("Unknown stage or tag: {0}")]
    UnknownSelector(String),

    #[error("Another run holds the lock: {0}")]
    Locked(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    Config(#[from] tierflow_core::TierError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn apply_failure(resource: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::ResourceApplyFailure {
            resource: resource.into(),
            message: error.to_string(),
        }
    }
}

/// Error reported by an external collaborator (container runtime, git, apt)
///
/// Carries the tool's own message unmodified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

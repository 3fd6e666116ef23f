//! Structured error taxonomy for the agent runtime.
//!
//! Each variant corresponds to one of the nine error kinds the loop
//! distinguishes: some fail the call, some become a failed `ToolResult` fed
//! back to the model, and some are cooperative (never logged as errors).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed input, unknown tool, or a sandbox boundary violation.
    /// Surfaced to the caller; never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Path requested by a tool call fell outside the sandbox boundary.
    #[error("boundary violation: {path}")]
    BoundaryViolation { path: PathBuf },

    /// Deny/NotAllowed classification. Callers should fold this into a
    /// failed `ToolResult` rather than treat it as a turn error.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A provider stream failed after exhausting the retry policy, or with
    /// a non-retryable provider error.
    #[error("model error: {0}")]
    ModelError(#[from] atrium_provider::ProviderError),

    /// Failure from the persistent store (WAL write, event append, read).
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// The turn or lease was cancelled cooperatively. Never logged as an
    /// error on the Monitor channel.
    #[error("cancelled")]
    Cancelled,

    /// A defect: duplicate `callId`, a `ToolResult` with no matching
    /// `ToolUse`, an illegal tool-call state transition. The turn must stop
    /// without corrupting state.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("duplicate tool registration: {0}")]
    DuplicateTool(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether this error belongs to a turn-fatal class (`Done(Error)`) as
    /// opposed to being folded into a `ToolResult` or handled as a suspend
    /// state.
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::ModelError(_) | AgentError::Store(_) | AgentError::InvariantViolation(_)
        )
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Internal(format!("serialization: {e}"))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

//! Error types for workflow execution.

use thiserror::Error;
use uuid::Uuid;

/// Why a step failed.
///
/// `Cancelled` and `ApprovalRejected` are sentinels: they end the run but
/// are not failures of the system.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Workflow cancelled by user")]
    Cancelled,

    #[error("Approval was rejected")]
    ApprovalRejected,

    #[error("Output blocked: {message}")]
    GuardrailBlocked { message: String },

    #[error("Model invocation failed: {0}")]
    Model(String),

    #[error("Invalid run data: {0}")]
    InvalidData(String),
}

impl StepError {
    /// User-initiated or approval outcome rather than a real failure
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ApprovalRejected)
    }
}

/// Errors raised by the engine itself
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("No suspended run with id {0}")]
    RunNotFound(Uuid),

    #[error("Run {id} is {status} and cannot be resumed")]
    NotResumable { id: Uuid, status: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),
}

//! Core orchestration logic.
//!
//! This module contains:
//! - Workflow: step trait and ordered workflow definitions
//! - Engine: run execution with suspend and resume
//! - Registry: storage for suspended runs
//! - Chat: the chat-turn workflow and the `ChatService` facade

pub mod chat;
pub mod engine;
pub mod error;
pub mod registry;
pub mod workflow;

// Re-export commonly used types
pub use chat::{
    chat_workflow, CancelReason, ChatDeps, ChatOutcome, ChatService, ChatTurn, FailureKind,
    APPROVAL_REASON, GENERIC_BLOCK_MESSAGE,
};
pub use engine::{RunOutcome, WorkflowEngine};
pub use error::{StepError, WorkflowError};
pub use registry::{InMemoryRunRegistry, RunRegistry, WorkflowSettings};
pub use workflow::{Step, StepContext, StepResult, Workflow};

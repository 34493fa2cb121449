//! Domain types for the chatflow engine.
//!
//! This module contains the core data structures:
//! - Request: an inbound user turn
//! - Run: workflow execution state
//! - Verdict: guardrail evaluation results
//! - Events: telemetry records
//! - Message: prompt messages, stream parts, retrieved documents

pub mod events;
pub mod message;
pub mod request;
pub mod run;
pub mod verdict;

// Re-export commonly used types
pub use events::{EventType, TelemetryEvent};
pub use message::{ChatMessage, RetrievedDocument, Role, StreamPart, ToolCall};
pub use request::{Action, Request};
pub use run::{RunData, RunStatus, WorkflowRun};
pub use verdict::{GuardrailVerdict, VerdictAction};

//! chatflow - Guarded conversational workflow engine
//!
//! A Rust backend for chat turns: each user message runs through a small
//! step-based workflow that can pause for human approval before the model
//! is called.
//!
//! # Architecture
//!
//! A chat turn flows through:
//! - Input guardrails (word filter, sanitizer, structural validation)
//! - A workflow run: validate, retrieve documents, build the prompt,
//!   await approval, call the model, finalize
//! - Output guardrails that redact long digit runs while streaming
//!
//! Guardrail verdicts and tool calls are recorded as telemetry off the
//! request path.
//!
//! # Modules
//!
//! - `adapters`: External integrations (OpenRouter chat model, HTTP document search)
//! - `conversation`: Per-conversation mode tracking and system prompts
//! - `core`: Workflow engine, run registry and the chat workflow
//! - `domain`: Data structures (Request, WorkflowRun, GuardrailVerdict, TelemetryEvent)
//! - `guardrails`: Input and output guardrail chains
//! - `retrieval`: Relevance gate over document search
//! - `telemetry`: Background recorder and SQLite sink
//! - `tools`: Model-callable tools
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Send a message (prompts for approval)
//! chatflow chat "what is 12 * 7?"
//!
//! # Check a message against the input guardrails
//! chatflow check "contact me at a@b.com"
//!
//! # Inspect recent guardrail verdicts
//! chatflow telemetry --kind guardrail
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod core;
pub mod domain;
pub mod guardrails;
pub mod retrieval;
pub mod telemetry;
pub mod tools;

// Re-export main types at crate root for convenience
pub use core::{ChatOutcome, ChatService, WorkflowEngine};
pub use domain::{GuardrailVerdict, Request, RunStatus, StreamPart, WorkflowRun};
pub use guardrails::{InputGuardrailChain, OutputGuardrailChain};
pub use telemetry::TelemetryRecorder;

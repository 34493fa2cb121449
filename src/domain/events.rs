//! Telemetry events.
//!
//! Events are append-only observability records. They are written
//! asynchronously and never read back by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single telemetry record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// Conversation the event belongs to (if known)
    pub conversation_id: Option<String>,

    /// Category of the event
    pub event_type: EventType,

    /// Tool or guardrail name
    pub name: String,

    /// "USED" for tools; "PASSED" / "BLOCKED" / "UNKNOWN" for guardrails
    pub status: String,

    /// Arguments or verdict payload
    pub metadata: Value,

    /// When this event occurred
    pub created_at: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        event_type: EventType,
        name: impl Into<String>,
        status: impl Into<String>,
        metadata: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: None,
            event_type,
            name: name.into(),
            status: status.into(),
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Attach the conversation id
    pub fn with_conversation(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }
}

/// Types of telemetry events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A tool was invoked
    Tool,

    /// A guardrail returned a verdict
    Guardrail,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tool => "TOOL",
            Self::Guardrail => "GUARDRAIL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "TOOL" => Some(Self::Tool),
            "GUARDRAIL" => Some(Self::Guardrail),
            _ => None,
        }
    }
}

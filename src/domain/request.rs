//! Inbound chat requests.

use serde::{Deserialize, Serialize};

/// What the caller wants the run to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Process the turn normally
    Run,

    /// Abort the turn at the approval step
    Cancel,
}

impl Default for Action {
    fn default() -> Self {
        Self::Run
    }
}

/// A single user turn submitted to the engine.
///
/// Immutable once accepted into a run: the workflow copies it into the run
/// data and never writes it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub user_id: String,
    pub conversation_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl Request {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            text: text.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Effective action (absent means run)
    pub fn action(&self) -> Action {
        self.action.unwrap_or_default()
    }

    /// Fresh conversation id in the `conv_<millis>` form
    pub fn new_conversation_id() -> String {
        format!("conv_{}", chrono::Utc::now().timestamp_millis())
    }
}

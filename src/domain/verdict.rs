//! Guardrail verdicts.
//!
//! A verdict is the structured result of one guardrail evaluation. The
//! constructors keep the two invariants: a failing verdict always blocks, and
//! a modifying verdict always carries its replacement payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a guardrail decided to do with its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictAction {
    Allow,
    Modify,
    Block,
}

/// Result of a guardrail evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailVerdict {
    pub pass: bool,
    pub action: VerdictAction,

    /// Replacement payload (input or output text, depending on the chain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,

    /// User-safe message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Diagnostic data; may hold internal-only fields
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl GuardrailVerdict {
    pub fn allow() -> Self {
        Self {
            pass: true,
            action: VerdictAction::Allow,
            modified: None,
            message: None,
            metadata: Map::new(),
        }
    }

    pub fn modify(replacement: impl Into<String>) -> Self {
        Self {
            pass: true,
            action: VerdictAction::Modify,
            modified: Some(replacement.into()),
            message: None,
            metadata: Map::new(),
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self {
            pass: false,
            action: VerdictAction::Block,
            modified: None,
            message: Some(message.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_block(&self) -> bool {
        self.action == VerdictAction::Block
    }

    pub fn is_modify(&self) -> bool {
        self.action == VerdictAction::Modify
    }

    /// The verdict without metadata, safe to hand past the API boundary
    pub fn redacted(&self) -> Self {
        Self {
            metadata: Map::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_never_passes() {
        let verdict = GuardrailVerdict::block("no");
        assert!(!verdict.pass);
        assert!(verdict.is_block());
    }

    #[test]
    fn test_modify_carries_payload() {
        let verdict = GuardrailVerdict::modify("[email]");
        assert!(verdict.pass);
        assert_eq!(verdict.modified.as_deref(), Some("[email]"));
    }

    #[test]
    fn test_redacted_drops_metadata() {
        let verdict = GuardrailVerdict::block("no").with_metadata("blockedWord", "secret");
        let safe = verdict.redacted();

        assert!(safe.metadata.is_empty());
        assert_eq!(safe.message.as_deref(), Some("no"));
    }
}

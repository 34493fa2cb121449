//! Tools the model may call during a turn.

pub mod calculator;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::telemetry::TelemetryRecorder;

pub use calculator::Calculator;

/// Errors raised by tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool failed: {0}")]
    Execution(String),

    #[error("Unknown tool: {0}")]
    Unknown(String),
}

/// Per-invocation call options
#[derive(Debug, Clone, Default)]
pub struct ToolOptions {
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

/// A function the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name advertised to the model
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    /// Run the tool with the model-provided arguments
    async fn execute(&self, args: Value, options: &ToolOptions) -> Result<Value, ToolError>;
}

/// Tools available to one turn, looked up by name
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    /// Calculator, recorded to telemetry on every call
    pub fn standard(recorder: &TelemetryRecorder) -> Self {
        Self::new().with(recorder.instrument(Calculator))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function-tool definitions in chat-completions format
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Execute a named tool
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        options: &ToolOptions,
    ) -> Result<Value, ToolError> {
        match self.get(name) {
            Some(tool) => tool.execute(args, options).await,
            None => Err(ToolError::Unknown(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_standard_set() {
        let tools = ToolSet::standard(&TelemetryRecorder::disabled());
        assert_eq!(tools.names(), vec!["calculate"]);

        let defs = tools.definitions();
        assert_eq!(defs[0]["function"]["name"], "calculate");
        assert_eq!(defs[0]["type"], "function");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = ToolSet::new()
            .call("missing", json!({}), &ToolOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unknown(name) if name == "missing"));
    }
}

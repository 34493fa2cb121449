//! OpenRouter-compatible chat completions adapter.
//!
//! Streams the answer over server-sent events, executes tool calls the model
//! requests and continues the conversation for a bounded number of rounds.
//! Conversation history is kept in process memory when the turn's memory
//! policy allows it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::{ChatMessage, Role, StreamPart, ToolCall};
use crate::tools::ToolOptions;

use super::{ChatModel, ChunkSink, GenerateOptions};

/// Messages remembered per conversation
const HISTORY_LIMIT: usize = 20;

/// Model endpoint and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Chat completions URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds (default: 120)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Tool-call rounds before the model must answer (default: 4)
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// API key (from OPENROUTER_API_KEY; never written out)
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "amazon/nova-2-lite-v1:free".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_max_tool_rounds() -> usize {
    4
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            timeout_seconds: default_timeout(),
            max_tool_rounds: default_max_tool_rounds(),
            api_key: None,
        }
    }
}

/// Streaming chat-completions client
pub struct OpenRouterModel {
    settings: ModelSettings,
    api_key: String,
    client: reqwest::Client,
    history: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl OpenRouterModel {
    pub fn new(settings: ModelSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .context("OPENROUTER_API_KEY environment variable required")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            settings,
            api_key,
            client,
            history: Mutex::new(HashMap::new()),
        })
    }

    fn history(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<ChatMessage>>> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Splice remembered turns between the system prompt and the new message
    fn with_history(&self, messages: &[ChatMessage], options: &GenerateOptions) -> Vec<ChatMessage> {
        if !options.memory.enabled {
            return messages.to_vec();
        }

        let remembered = self
            .history()
            .get(&options.conversation_id)
            .cloned()
            .unwrap_or_default();

        let split = messages
            .iter()
            .position(|m| m.role != Role::System)
            .unwrap_or(messages.len());

        let mut out = messages[..split].to_vec();
        out.extend(remembered);
        out.extend_from_slice(&messages[split..]);
        out
    }

    fn remember(&self, messages: &[ChatMessage], options: &GenerateOptions, answer: &str) {
        if !options.memory.enabled {
            return;
        }
        let Some(user) = messages.iter().rev().find(|m| m.role == Role::User) else {
            return;
        };

        let mut history = self.history();
        let turns = history.entry(options.conversation_id.clone()).or_default();
        turns.push(user.clone());
        turns.push(ChatMessage::assistant(answer));
        if turns.len() > HISTORY_LIMIT {
            let excess = turns.len() - HISTORY_LIMIT;
            turns.drain(..excess);
        }
    }

    /// One streamed completion; text deltas go straight to `sink`
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        offer_tools: bool,
        sink: &mut dyn ChunkSink,
    ) -> Result<CompletionTurn> {
        let mut body = json!({
            "model": self.settings.model,
            "stream": true,
            "user": options.user_id,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if offer_tools {
            body["tools"] = Value::Array(options.tools.definitions());
        }

        let mut response = self
            .client
            .post(&self.settings.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", "http://localhost")
            .header("X-Title", "chatflow")
            .json(&body)
            .send()
            .await
            .context("Failed to reach model endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Model endpoint error ({}): {}", status, text);
        }

        let mut turn = CompletionTurn::default();
        let mut buffer = SseBuffer::default();

        while let Some(bytes) = response
            .chunk()
            .await
            .context("Model stream interrupted")?
        {
            buffer.push(&bytes);
            while let Some(block) = buffer.next_event_block() {
                for data in data_lines(&block) {
                    if data == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => turn.apply(chunk, sink),
                        Err(e) => debug!(error = %e, "Skipping unparseable stream event"),
                    }
                }
            }
        }

        Ok(turn)
    }
}

#[async_trait]
impl ChatModel for OpenRouterModel {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        sink: &mut dyn ChunkSink,
    ) -> Result<String> {
        let mut conversation = self.with_history(messages, options);
        let tool_options = ToolOptions {
            conversation_id: Some(options.conversation_id.clone()),
            user_id: Some(options.user_id.clone()),
        };

        let mut answer = String::new();
        let mut finish_reason = String::from("stop");

        for round in 0..=self.settings.max_tool_rounds {
            let offer_tools = round < self.settings.max_tool_rounds && !options.tools.is_empty();
            let turn = self
                .complete(&conversation, options, offer_tools, sink)
                .await?;

            answer.push_str(&turn.text);
            if let Some(reason) = &turn.finish_reason {
                finish_reason = reason.clone();
            }

            let calls = turn.tool_calls();
            if calls.is_empty() {
                break;
            }

            debug!(round, count = calls.len(), "Model requested tools");
            conversation.push(ChatMessage::assistant_tool_calls(calls.clone()));

            for call in calls {
                sink.push(StreamPart::ToolCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });

                let result = match options
                    .tools
                    .call(&call.name, call.arguments.clone(), &tool_options)
                    .await
                {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        json!({ "error": e.to_string() })
                    }
                };
                conversation.push(ChatMessage::tool_result(call.id, result.to_string()));
            }
        }

        sink.push(StreamPart::Finish {
            reason: finish_reason,
        });
        self.remember(messages, options, &answer);
        Ok(answer)
    }
}

/// Chat-completions JSON for one message
fn wire_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    if message.role == Role::Tool {
        return json!({
            "role": role,
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        });
    }

    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                })
            })
            .collect();
        return json!({ "role": role, "content": message.content, "tool_calls": calls });
    }

    json!({ "role": role, "content": message.content })
}

/// Splits a byte stream into SSE event blocks
#[derive(Debug, Default)]
struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_event_block(&mut self) -> Option<String> {
        let boundary = self.buffer.windows(2).position(|w| w == b"\n\n")?;
        let rest = self.buffer.split_off(boundary + 2);
        let block = std::mem::replace(&mut self.buffer, rest);
        Some(String::from_utf8_lossy(&block).into_owned())
    }
}

fn data_lines(block: &str) -> Vec<&str> {
    block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect()
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulated state of one streamed completion
#[derive(Debug, Default)]
struct CompletionTurn {
    text: String,
    calls: BTreeMap<usize, PartialCall>,
    finish_reason: Option<String>,
}

impl CompletionTurn {
    fn apply(&mut self, chunk: StreamChunk, sink: &mut dyn ChunkSink) {
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.text.push_str(&content);
                sink.push(StreamPart::text(content));
            }

            for delta in choice.delta.tool_calls {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }

            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.calls
            .iter()
            .map(|(index, call)| ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    call.id.clone()
                },
                name: call.name.clone(),
                arguments: serde_json::from_str(&call.arguments)
                    .unwrap_or_else(|_| Value::String(call.arguments.clone())),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Parts(Vec<StreamPart>);

    impl ChunkSink for Parts {
        fn push(&mut self, part: StreamPart) {
            self.0.push(part);
        }
    }

    #[test]
    fn test_sse_buffer_handles_split_frames() {
        let mut buffer = SseBuffer::default();
        buffer.push(b"data: one\n\ndata: tw");
        assert_eq!(buffer.next_event_block().as_deref(), Some("data: one\n\n"));
        assert!(buffer.next_event_block().is_none());

        buffer.push(b"o\n\n");
        let block = buffer.next_event_block().unwrap();
        assert_eq!(data_lines(&block), vec!["two"]);
    }

    #[test]
    fn test_turn_accumulates_text_and_tool_calls() {
        let mut turn = CompletionTurn::default();
        let mut sink = Parts::default();

        let events = [
            r#"{"choices":[{"delta":{"content":"Let me "}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"calculate","arguments":"{\"expr"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"ession\":\"2 + 2\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        ];
        for event in events {
            turn.apply(serde_json::from_str(event).unwrap(), &mut sink);
        }

        assert_eq!(turn.text, "Let me ");
        assert_eq!(sink.0, vec![StreamPart::text("Let me ")]);
        assert_eq!(turn.finish_reason.as_deref(), Some("tool_calls"));

        let calls = turn.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments["expression"], "2 + 2");
    }

    #[test]
    fn test_wire_message_shapes() {
        let tool = wire_message(&ChatMessage::tool_result("call_a", "{\"result\":4}"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_a");

        let call = wire_message(&ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "call_a".into(),
            name: "calculate".into(),
            arguments: json!({"expression": "2 + 2"}),
        }]));
        assert_eq!(call["tool_calls"][0]["function"]["arguments"], "{\"expression\":\"2 + 2\"}");
    }

    #[test]
    fn test_missing_api_key() {
        assert!(OpenRouterModel::new(ModelSettings::default()).is_err());
    }
}

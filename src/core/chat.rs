//! The chat-turn workflow and the service facade callers use.
//!
//! Steps: validate-input, rag-search, build-messages, await-approval,
//! run-model, finalize. Input guardrails run before the workflow starts;
//! output guardrails run inside run-model as the answer streams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{ChatModel, ChunkSink, GenerateOptions};
use crate::conversation::{build_system_prompt, ConversationModeTracker, MemoryPolicy, Mode};
use crate::domain::{Action, ChatMessage, Request, RunData, RunStatus, StreamPart};
use crate::guardrails::validation::EMPTY_MESSAGE;
use crate::guardrails::{InputGuardrailChain, OutputGuardrailChain, OutputStream};
use crate::retrieval::{RetrievalContext, RetrievalGate};
use crate::tools::ToolSet;

use super::engine::{RunOutcome, WorkflowEngine};
use super::error::{StepError, WorkflowError};
use super::registry::RunRegistry;
use super::workflow::{Step, StepContext, StepResult, Workflow};

pub const CHAT_WORKFLOW_ID: &str = "unified-chat-workflow";

/// Reason reported when a run suspends for approval
pub const APPROVAL_REASON: &str = "Awaiting approval before calling the model";

/// Shown for policy blocks that carry no message of their own
pub const GENERIC_BLOCK_MESSAGE: &str =
    "Your message violates content rules. Please rephrase and try again.";

/// Collaborators available to every chat step (cheap to clone)
#[derive(Clone)]
pub struct ChatDeps {
    pub tracker: ConversationModeTracker,
    pub retrieval: RetrievalGate,
    pub model: Arc<dyn ChatModel>,
    pub output: OutputGuardrailChain,
    pub tools: ToolSet,
    pub require_approval: bool,
    pub model_timeout: Duration,

    /// Where guarded stream parts are forwarded, if anyone is listening
    pub stream: Option<UnboundedSender<StreamPart>>,
}

/// Run data of a chat turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub user_id: String,
    pub conversation_id: String,
    /// Text after input sanitization; sent to retrieval and the model
    pub text: String,
    /// Text as the user wrote it; drives mode classification
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub action: Action,

    /// User-facing notice from input sanitization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RetrievalContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl ChatTurn {
    pub fn from_request(request: &Request) -> Self {
        Self {
            user_id: request.user_id.clone(),
            conversation_id: request.conversation_id.clone(),
            text: request.text.clone(),
            raw_text: request.text.clone(),
            action: request.action(),
            ..Default::default()
        }
    }

    pub fn from_data(data: &RunData) -> Result<Self, StepError> {
        serde_json::from_value(Value::Object(data.clone()))
            .map_err(|e| StepError::InvalidData(e.to_string()))
    }

    pub fn into_data(self) -> Result<RunData, StepError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(StepError::InvalidData(format!("expected object, got {}", other))),
            Err(e) => Err(StepError::InvalidData(e.to_string())),
        }
    }
}

/// Run `f` over the turn and store the result as the next step's data
fn update(data: &RunData, f: impl FnOnce(&mut ChatTurn)) -> StepResult {
    let mut turn = match ChatTurn::from_data(data) {
        Ok(turn) => turn,
        Err(e) => return StepResult::Fail(e),
    };
    f(&mut turn);
    match turn.into_data() {
        Ok(data) => StepResult::NewData(data),
        Err(e) => StepResult::Fail(e),
    }
}

/// Rejects empty text
pub struct ValidateInput;

#[async_trait]
impl Step<ChatDeps> for ValidateInput {
    fn id(&self) -> &str {
        "validate-input"
    }

    async fn execute(&self, ctx: StepContext<'_, ChatDeps>) -> StepResult {
        let turn = match ChatTurn::from_data(ctx.data) {
            Ok(turn) => turn,
            Err(e) => return StepResult::Fail(e),
        };
        if turn.text.trim().is_empty() {
            return StepResult::Fail(StepError::Validation(EMPTY_MESSAGE.to_string()));
        }
        StepResult::NewData(ctx.data.clone())
    }
}

/// Gathers grounding documents
pub struct RagSearch;

#[async_trait]
impl Step<ChatDeps> for RagSearch {
    fn id(&self) -> &str {
        "rag-search"
    }

    async fn execute(&self, ctx: StepContext<'_, ChatDeps>) -> StepResult {
        let turn = match ChatTurn::from_data(ctx.data) {
            Ok(turn) => turn,
            Err(e) => return StepResult::Fail(e),
        };

        let gate = &ctx.deps.retrieval;
        let context = gate.retrieve(&turn.text, gate.settings().top_k).await;

        update(ctx.data, |turn| turn.context = Some(context))
    }
}

/// Classifies the conversation mode and assembles the prompt
pub struct BuildMessages;

#[async_trait]
impl Step<ChatDeps> for BuildMessages {
    fn id(&self) -> &str {
        "build-messages"
    }

    async fn execute(&self, ctx: StepContext<'_, ChatDeps>) -> StepResult {
        let tracker = &ctx.deps.tracker;
        update(ctx.data, |turn| {
            let mode = tracker.observe(&turn.conversation_id, &turn.raw_text);
            let context = turn.context.clone().unwrap_or_default();
            turn.messages = vec![
                ChatMessage::system(build_system_prompt(mode, &context)),
                ChatMessage::user(turn.text.clone()),
            ];
            turn.mode = Some(mode);
        })
    }
}

/// Suspends until an external actor approves the model call
pub struct AwaitApproval;

#[async_trait]
impl Step<ChatDeps> for AwaitApproval {
    fn id(&self) -> &str {
        "await-approval"
    }

    async fn execute(&self, ctx: StepContext<'_, ChatDeps>) -> StepResult {
        let turn = match ChatTurn::from_data(ctx.data) {
            Ok(turn) => turn,
            Err(e) => return StepResult::Fail(e),
        };

        if turn.action == Action::Cancel {
            return StepResult::Fail(StepError::Cancelled);
        }

        match ctx.resume_data {
            None if ctx.deps.require_approval => StepResult::Suspend(APPROVAL_REASON.to_string()),
            None => StepResult::NewData(ctx.data.clone()),
            Some(resume) => {
                let approved = resume
                    .get("approved")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if approved {
                    StepResult::NewData(ctx.data.clone())
                } else {
                    StepResult::Fail(StepError::ApprovalRejected)
                }
            }
        }
    }
}

/// Guards stream parts before they leave the model step
struct GuardedSink<'a> {
    stream: OutputStream<'a>,
    forward: Option<&'a UnboundedSender<StreamPart>>,
    saw_text: bool,
}

impl GuardedSink<'_> {
    fn send(&self, part: StreamPart) {
        if let Some(tx) = self.forward {
            let _ = tx.send(part);
        }
    }
}

impl ChunkSink for GuardedSink<'_> {
    fn push(&mut self, part: StreamPart) {
        if part.as_text().is_some() {
            self.saw_text = true;
        }
        if let Some(guarded) = self.stream.push(part) {
            self.send(guarded);
        }
    }
}

/// Calls the model with output guardrails applied to every chunk
pub struct RunModel;

#[async_trait]
impl Step<ChatDeps> for RunModel {
    fn id(&self) -> &str {
        "run-model"
    }

    async fn execute(&self, ctx: StepContext<'_, ChatDeps>) -> StepResult {
        let deps = ctx.deps;
        let turn = match ChatTurn::from_data(ctx.data) {
            Ok(turn) => turn,
            Err(e) => return StepResult::Fail(e),
        };
        let mode = turn.mode.unwrap_or(Mode::Normal);

        let options = GenerateOptions {
            user_id: turn.user_id.clone(),
            conversation_id: turn.conversation_id.clone(),
            memory: MemoryPolicy::for_mode(mode),
            tools: deps.tools.clone(),
        };

        let mut sink = GuardedSink {
            stream: deps.output.begin(),
            forward: deps.stream.as_ref(),
            saw_text: false,
        };

        let generated = tokio::time::timeout(
            deps.model_timeout,
            deps.model.generate(&turn.messages, &options, &mut sink),
        )
        .await;

        let text = match generated {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return StepResult::Fail(StepError::Model(format!("{:#}", e))),
            Err(_) => {
                return StepResult::Fail(StepError::Model(format!(
                    "timed out after {}s",
                    deps.model_timeout.as_secs()
                )))
            }
        };

        // A model that returned text without streaming it is guarded as one chunk
        if !sink.saw_text && !text.is_empty() {
            sink.push(StreamPart::text(text));
        }

        let GuardedSink { stream, forward, .. } = sink;
        let finished = stream.finish().await;
        if !finished.tail.is_empty() {
            if let Some(tx) = forward {
                let _ = tx.send(StreamPart::text(finished.tail.clone()));
            }
        }

        let Some(answer) = finished.output().map(str::to_string) else {
            let message = finished
                .verdict
                .message
                .clone()
                .unwrap_or_else(|| GENERIC_BLOCK_MESSAGE.to_string());
            return StepResult::Fail(StepError::GuardrailBlocked { message });
        };

        if mode == Mode::Simple {
            deps.tracker.schedule_revert(&turn.conversation_id);
        }

        update(ctx.data, |turn| turn.answer = Some(answer))
    }
}

/// Projects the result the caller sees
pub struct Finalize;

#[async_trait]
impl Step<ChatDeps> for Finalize {
    fn id(&self) -> &str {
        "finalize"
    }

    async fn execute(&self, ctx: StepContext<'_, ChatDeps>) -> StepResult {
        let turn = match ChatTurn::from_data(ctx.data) {
            Ok(turn) => turn,
            Err(e) => return StepResult::Fail(e),
        };

        let mut result = RunData::new();
        result.insert("text".into(), json!(turn.answer.unwrap_or_default()));
        result.insert("conversationId".into(), json!(turn.conversation_id));
        if let Some(notice) = turn.notice {
            result.insert("notice".into(), json!(notice));
        }
        StepResult::NewData(result)
    }
}

/// The six-step chat workflow
pub fn chat_workflow() -> Workflow<ChatDeps> {
    Workflow::new(CHAT_WORKFLOW_ID)
        .then(ValidateInput)
        .then(RagSearch)
        .then(BuildMessages)
        .then(AwaitApproval)
        .then(RunModel)
        .then(Finalize)
}

/// Why a turn ended without an answer but without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserCancelled,
    ApprovalRejected,
}

impl CancelReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UserCancelled => "Workflow cancelled by user",
            Self::ApprovalRejected => "Approval was rejected",
        }
    }
}

/// Class of a real failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Model or data failure; details stay in the logs
    Internal,
    /// Resume token does not name a suspended run
    UnknownRun,
}

/// What the caller gets back for a submitted or resumed turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ChatOutcome {
    Completed {
        text: String,
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice: Option<String>,
    },
    Suspended {
        reason: String,
        resume_token: String,
    },
    Blocked {
        message: String,
    },
    Cancelled {
        reason: CancelReason,
    },
    Failed {
        kind: FailureKind,
    },
}

impl ChatOutcome {
    fn from_run(outcome: RunOutcome) -> Self {
        let RunOutcome { run, error } = outcome;

        if let Some(error) = error {
            return match error {
                StepError::Validation(message) => Self::Blocked { message },
                StepError::GuardrailBlocked { message } => Self::Blocked { message },
                StepError::Cancelled => Self::Cancelled {
                    reason: CancelReason::UserCancelled,
                },
                StepError::ApprovalRejected => Self::Cancelled {
                    reason: CancelReason::ApprovalRejected,
                },
                StepError::Model(_) | StepError::InvalidData(_) => Self::Failed {
                    kind: FailureKind::Internal,
                },
            };
        }

        match run.status {
            RunStatus::Suspended => Self::Suspended {
                reason: run.suspend_reason.unwrap_or_default(),
                resume_token: run.id.to_string(),
            },
            RunStatus::Completed => {
                let field = |key: &str| run.data.get(key).and_then(Value::as_str).map(str::to_string);
                Self::Completed {
                    text: field("text").unwrap_or_default(),
                    conversation_id: field("conversationId").unwrap_or_default(),
                    notice: field("notice"),
                }
            }
            _ => Self::Failed {
                kind: FailureKind::Internal,
            },
        }
    }
}

/// Entry point for chat turns: input guardrails, then the workflow
pub struct ChatService {
    input: InputGuardrailChain,
    engine: WorkflowEngine<ChatDeps>,
    deps: ChatDeps,

    /// Periodic idle sweep of the mode tracker, stopped on drop
    sweeper: Option<JoinHandle<()>>,
}

impl ChatService {
    /// Build the service and, inside a Tokio runtime, start the idle sweeper
    pub fn new(
        input: InputGuardrailChain,
        deps: ChatDeps,
        registry: Arc<dyn RunRegistry>,
    ) -> Result<Self, WorkflowError> {
        let engine = WorkflowEngine::new(chat_workflow(), registry)?;

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(deps.tracker.spawn_sweeper()),
            Err(_) => {
                warn!("No Tokio runtime; idle conversations will not be swept");
                None
            }
        };

        Ok(Self {
            input,
            engine,
            deps,
            sweeper,
        })
    }

    pub fn engine(&self) -> &WorkflowEngine<ChatDeps> {
        &self.engine
    }

    pub fn tracker(&self) -> &ConversationModeTracker {
        &self.deps.tracker
    }

    fn deps_for(&self, stream: Option<UnboundedSender<StreamPart>>) -> ChatDeps {
        ChatDeps {
            stream,
            ..self.deps.clone()
        }
    }

    /// Process one turn
    pub async fn submit_request(&self, request: Request) -> ChatOutcome {
        self.submit(request, None).await
    }

    /// Process one turn, forwarding guarded stream parts to `stream`
    pub async fn submit_streaming(
        &self,
        request: Request,
        stream: UnboundedSender<StreamPart>,
    ) -> ChatOutcome {
        self.submit(request, Some(stream)).await
    }

    #[instrument(skip(self, request, stream), fields(conversation_id = %request.conversation_id))]
    async fn submit(
        &self,
        request: Request,
        stream: Option<UnboundedSender<StreamPart>>,
    ) -> ChatOutcome {
        let verdict = self.input.evaluate(&request.text).await;
        if verdict.is_block() {
            info!("Input blocked before workflow start");
            return ChatOutcome::Blocked {
                message: verdict
                    .message
                    .unwrap_or_else(|| GENERIC_BLOCK_MESSAGE.to_string()),
            };
        }

        let mut turn = ChatTurn::from_request(&request);
        if verdict.is_modify() {
            if let Some(text) = verdict.modified {
                turn.text = text;
            }
            turn.notice = verdict.message;
        }

        let data = match turn.into_data() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "Could not build run data");
                return ChatOutcome::Failed {
                    kind: FailureKind::Internal,
                };
            }
        };

        let deps = self.deps_for(stream);
        ChatOutcome::from_run(self.engine.start(data, &deps).await)
    }

    /// Approve or reject a suspended turn
    pub async fn resume_request(&self, resume_token: &str, approved: bool) -> ChatOutcome {
        self.resume(resume_token, approved, None).await
    }

    /// Approve or reject a suspended turn, streaming the answer
    pub async fn resume_streaming(
        &self,
        resume_token: &str,
        approved: bool,
        stream: UnboundedSender<StreamPart>,
    ) -> ChatOutcome {
        self.resume(resume_token, approved, Some(stream)).await
    }

    #[instrument(skip(self, stream))]
    async fn resume(
        &self,
        resume_token: &str,
        approved: bool,
        stream: Option<UnboundedSender<StreamPart>>,
    ) -> ChatOutcome {
        let Ok(run_id) = Uuid::parse_str(resume_token.trim()) else {
            warn!("Malformed resume token");
            return ChatOutcome::Failed {
                kind: FailureKind::UnknownRun,
            };
        };

        let deps = self.deps_for(stream);
        match self
            .engine
            .resume(run_id, json!({ "approved": approved }), &deps)
            .await
        {
            Ok(outcome) => ChatOutcome::from_run(outcome),
            Err(WorkflowError::RunNotFound(_)) => ChatOutcome::Failed {
                kind: FailureKind::UnknownRun,
            },
            Err(e) => {
                warn!(error = %e, "Resume failed");
                ChatOutcome::Failed {
                    kind: FailureKind::Internal,
                }
            }
        }
    }
}

impl Drop for ChatService {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

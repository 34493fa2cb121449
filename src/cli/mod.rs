//! Command-line interface for chatflow.
//!
//! Provides commands for chatting through the guarded workflow, checking
//! input against the guardrails, inspecting telemetry and showing the
//! resolved configuration.

use std::io::{self, IsTerminal, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;

use crate::adapters::{HttpDocumentSearch, OpenRouterModel};
use crate::config::{self, ResolvedConfig};
use crate::conversation::ConversationModeTracker;
use crate::core::{ChatDeps, ChatOutcome, ChatService, InMemoryRunRegistry};
use crate::domain::{Action, EventType, Request, StreamPart};
use crate::guardrails::{InputGuardrailChain, OutputGuardrailChain};
use crate::retrieval::RetrievalGate;
use crate::telemetry::{SqliteTelemetrySink, TelemetryRecorder};
use crate::tools::ToolSet;

/// chatflow - Guarded conversational workflow engine
#[derive(Parser, Debug)]
#[command(name = "chatflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one chat turn (reads stdin when no text is given)
    Chat {
        /// Message text
        text: Option<String>,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// User id sent to the model
        #[arg(short, long, default_value = "local-user", env = "CHATFLOW_USER")]
        user: String,

        /// Approve the model call without prompting
        #[arg(short, long)]
        yes: bool,

        /// Submit with action=cancel
        #[arg(long)]
        cancel: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run input guardrails only and print the verdict
    Check {
        /// Text to check
        text: String,
    },

    /// Show recent telemetry events
    Telemetry {
        /// Only events of this kind
        #[arg(short, long, value_enum)]
        kind: Option<EventKind>,

        /// Maximum number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Event type for CLI (maps to EventType)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum EventKind {
    /// Tool invocations
    Tool,

    /// Guardrail verdicts
    Guardrail,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Tool => EventType::Tool,
            EventKind::Guardrail => EventType::Guardrail,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Chat {
                text,
                conversation,
                user,
                yes,
                cancel,
                json,
            } => {
                let text = read_text(text)?;
                chat(text, conversation, user, yes, cancel, json).await
            }
            Commands::Check { text } => check(&text).await,
            Commands::Telemetry { kind, limit } => show_telemetry(kind, limit),
            Commands::Config => show_config(),
        }
    }
}

/// Start the telemetry writer (or a disabled recorder)
pub fn telemetry_recorder(cfg: &ResolvedConfig) -> Result<TelemetryRecorder> {
    if !cfg.telemetry.enabled {
        return Ok(TelemetryRecorder::disabled());
    }
    let sink = SqliteTelemetrySink::open(&cfg.telemetry.database).with_context(|| {
        format!(
            "Failed to open telemetry database: {}",
            cfg.telemetry.database.display()
        )
    })?;
    Ok(TelemetryRecorder::spawn(Arc::new(sink)))
}

/// Assemble the chat service from configuration
pub fn build_service(cfg: &ResolvedConfig, recorder: &TelemetryRecorder) -> Result<ChatService> {
    let input = InputGuardrailChain::standard(&cfg.guardrails, recorder)?;
    let output = OutputGuardrailChain::standard(recorder)?;
    let tracker = ConversationModeTracker::new(cfg.conversation.clone())?;

    let retrieval = match &cfg.retrieval.endpoint {
        Some(endpoint) => RetrievalGate::new(
            Arc::new(HttpDocumentSearch::new(endpoint.clone())),
            cfg.retrieval.clone(),
        ),
        None => RetrievalGate::disabled(),
    };

    let model = OpenRouterModel::new(cfg.model.clone())?;

    let deps = ChatDeps {
        tracker,
        retrieval,
        model: Arc::new(model),
        output,
        tools: ToolSet::standard(recorder),
        require_approval: cfg.workflow.require_approval,
        model_timeout: Duration::from_secs(cfg.model.timeout_seconds),
        stream: None,
    };

    let registry = Arc::new(InMemoryRunRegistry::from_settings(&cfg.workflow));
    Ok(ChatService::new(input, deps, registry)?)
}

/// Text from the argument, else from piped stdin
fn read_text(text: Option<String>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if io::stdin().is_terminal() {
        anyhow::bail!("No message given. Pass text as an argument or pipe it on stdin.");
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

/// Run one chat turn, prompting for approval when the run suspends
async fn chat(
    text: String,
    conversation: Option<String>,
    user: String,
    yes: bool,
    cancel: bool,
    json: bool,
) -> Result<()> {
    let cfg = config::config()?;
    let recorder = telemetry_recorder(cfg)?;
    let service = build_service(cfg, &recorder)?;

    let conversation_id = conversation.unwrap_or_else(Request::new_conversation_id);
    let mut request = Request::new(user, conversation_id, text);
    if cancel {
        request = request.with_action(Action::Cancel);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_stream(rx, !json));

    let mut outcome = service.submit_streaming(request, tx.clone()).await;
    while let ChatOutcome::Suspended { reason, resume_token } = &outcome {
        let token = resume_token.clone();
        let approved = yes || prompt_approval(reason)?;
        outcome = service.resume_streaming(&token, approved, tx.clone()).await;
    }

    drop(tx);
    let streamed = printer.await.context("Stream printer failed")?;
    recorder.flush().await;

    report(&outcome, &streamed, json)
}

/// Print text deltas as they arrive; returns everything printed
async fn print_stream(mut rx: mpsc::UnboundedReceiver<StreamPart>, live: bool) -> String {
    let mut streamed = String::new();
    while let Some(part) = rx.recv().await {
        match part {
            StreamPart::TextDelta { text } => {
                if live {
                    print!("{}", text);
                    let _ = io::stdout().flush();
                }
                streamed.push_str(&text);
            }
            StreamPart::ToolCall { name, arguments } => {
                if live {
                    eprintln!("\n[tool: {} {}]", name, arguments);
                }
            }
            StreamPart::Finish { .. } => {}
        }
    }
    streamed
}

/// Message used when an approval is needed but nobody can answer it
const NON_INTERACTIVE_APPROVAL: &str =
    "Approval required but stdin is not a terminal. Pass --yes to approve or --cancel to cancel.";

fn ensure_interactive(stdin_is_terminal: bool) -> Result<()> {
    if !stdin_is_terminal {
        anyhow::bail!(NON_INTERACTIVE_APPROVAL);
    }
    Ok(())
}

fn prompt_approval(reason: &str) -> Result<bool> {
    // Piped stdin was already consumed as the message
    ensure_interactive(io::stdin().is_terminal())?;

    eprint!("{}. Approve? [y/N] ", reason);
    io::stderr().flush().ok();

    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read approval")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn report(outcome: &ChatOutcome, streamed: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome {
        ChatOutcome::Completed {
            text,
            conversation_id,
            notice,
        } => {
            // Finalization may append to what was streamed (safety notices)
            match text.strip_prefix(streamed) {
                Some(rest) => println!("{}", rest),
                None => println!("\n{}", text),
            }
            if let Some(notice) = notice {
                eprintln!("\n[{}]", notice);
            }
            eprintln!("\n[conversation {}]", conversation_id);
            Ok(())
        }
        ChatOutcome::Blocked { message } => {
            eprintln!("{}", message);
            Ok(())
        }
        ChatOutcome::Cancelled { reason } => {
            eprintln!("{}", reason.message());
            Ok(())
        }
        ChatOutcome::Suspended { resume_token, .. } => {
            anyhow::bail!("Run {} is still suspended", resume_token)
        }
        ChatOutcome::Failed { kind } => {
            anyhow::bail!("Something went wrong ({:?}). Please try again.", kind)
        }
    }
}

/// Evaluate the input guardrails without running the workflow
async fn check(text: &str) -> Result<()> {
    let cfg = config::config()?;
    let recorder = telemetry_recorder(cfg)?;
    let chain = InputGuardrailChain::standard(&cfg.guardrails, &recorder)?;

    let verdict = chain.evaluate(text).await;
    recorder.flush().await;

    println!("{}", serde_json::to_string_pretty(&verdict.redacted())?);
    Ok(())
}

/// List recent telemetry events, newest first
fn show_telemetry(kind: Option<EventKind>, limit: usize) -> Result<()> {
    let cfg = config::config()?;
    let path = &cfg.telemetry.database;
    if !path.exists() {
        println!("No telemetry recorded yet ({})", path.display());
        return Ok(());
    }

    let sink = SqliteTelemetrySink::open(path)?;
    let events = sink.recent(kind.map(EventType::from), limit)?;
    if events.is_empty() {
        println!("No events found");
        return Ok(());
    }

    println!(
        "{:<26} {:<10} {:<18} {:<8} {}",
        "TIME", "TYPE", "NAME", "STATUS", "CONVERSATION"
    );
    println!("{}", "-".repeat(80));
    for event in events {
        println!(
            "{:<26} {:<10} {:<18} {:<8} {}",
            event.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            event.event_type.as_str(),
            event.name,
            event.status,
            event.conversation_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Print the resolved configuration as YAML
fn show_config() -> Result<()> {
    let cfg = config::config()?;
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!(
        "API key:     {}",
        if cfg.model.api_key.is_some() { "set" } else { "not set" }
    );
    println!();
    print!("{}", serde_yaml::to_string(cfg)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_command() {
        let cli = Cli::try_parse_from([
            "chatflow",
            "chat",
            "hello there",
            "--conversation",
            "conv_1",
            "--yes",
        ])
        .unwrap();

        match cli.command {
            Commands::Chat {
                text,
                conversation,
                yes,
                cancel,
                ..
            } => {
                assert_eq!(text.as_deref(), Some("hello there"));
                assert_eq!(conversation.as_deref(), Some("conv_1"));
                assert!(yes);
                assert!(!cancel);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_piped_stdin_cannot_approve() {
        let err = ensure_interactive(false).unwrap_err();
        assert!(err.to_string().contains("--yes"));
        assert!(ensure_interactive(true).is_ok());
    }

    #[test]
    fn test_parse_telemetry_kind() {
        let cli = Cli::try_parse_from(["chatflow", "telemetry", "--kind", "guardrail", "-l", "5"])
            .unwrap();
        match cli.command {
            Commands::Telemetry { kind, limit } => {
                assert!(matches!(kind.map(EventType::from), Some(EventType::Guardrail)));
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}

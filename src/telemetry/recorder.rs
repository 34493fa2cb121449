//! Fire-and-forget telemetry recorder.
//!
//! Events are handed to a dedicated writer thread over an unbounded channel.
//! Callers never wait on the sink and never see its errors.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::{EventType, GuardrailVerdict, TelemetryEvent};
use crate::tools::Tool;

use super::decorators::{Telemetered, ToolTelemetry};
use super::sink::TelemetrySink;

enum Command {
    Write(TelemetryEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle to the telemetry write path (cheap to clone)
#[derive(Clone, Default)]
pub struct TelemetryRecorder {
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl TelemetryRecorder {
    /// Start a writer thread draining events into `sink`
    pub fn spawn(sink: Arc<dyn TelemetrySink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        let spawned = std::thread::Builder::new()
            .name("telemetry-writer".to_string())
            .spawn(move || {
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        Command::Write(event) => {
                            if let Err(e) = sink.write(&event) {
                                warn!(
                                    event_type = event.event_type.as_str(),
                                    name = %event.name,
                                    error = %e,
                                    "Failed to record telemetry event"
                                );
                            }
                        }
                        Command::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                debug!("Telemetry writer stopped");
            });

        match spawned {
            Ok(_) => Self { tx: Some(tx) },
            Err(e) => {
                warn!(error = %e, "Telemetry writer unavailable, events will be dropped");
                Self::disabled()
            }
        }
    }

    /// A recorder that drops every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue an event; never blocks, never fails
    pub fn record(
        &self,
        event_type: EventType,
        name: &str,
        status: &str,
        metadata: Value,
        conversation_id: Option<String>,
    ) {
        self.record_event(
            TelemetryEvent::new(event_type, name, status, metadata).with_conversation(conversation_id),
        );
    }

    pub fn record_event(&self, event: TelemetryEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(Command::Write(event)).is_err() {
            debug!("Telemetry writer gone, event dropped");
        }
    }

    /// Record a guardrail verdict, status derived from its `pass` field
    pub fn record_verdict(&self, guardrail: &str, verdict: &GuardrailVerdict) {
        if !self.is_enabled() {
            return;
        }
        let payload = match serde_json::to_value(verdict) {
            Ok(value) => value,
            Err(e) => {
                warn!(guardrail, error = %e, "Unserializable verdict");
                Value::Null
            }
        };
        let status = status_from_verdict(&payload);
        self.record(EventType::Guardrail, guardrail, status, payload, None);
    }

    /// Wait until every event queued before this call has been written
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Wrap a guardrail so each verdict is recorded
    pub fn guard<G>(&self, guardrail: G) -> Telemetered<G> {
        Telemetered::new(guardrail, self.clone())
    }

    /// Wrap a tool so each invocation is recorded
    pub fn instrument<T: Tool>(&self, tool: T) -> ToolTelemetry<T> {
        ToolTelemetry::new(tool, self.clone())
    }
}

/// "PASSED" / "BLOCKED" from a serialized verdict, "UNKNOWN" when `pass` is absent
pub fn status_from_verdict(verdict: &Value) -> &'static str {
    match verdict.get("pass").and_then(Value::as_bool) {
        Some(true) => "PASSED",
        Some(false) => "BLOCKED",
        None => "UNKNOWN",
    }
}

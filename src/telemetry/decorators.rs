//! Telemetry decorators composed around guardrails and tools.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::domain::{EventType, GuardrailVerdict};
use crate::guardrails::{InputGuardrail, OutputGuardrail, StreamState};
use crate::tools::{Tool, ToolError, ToolOptions};

use super::TelemetryRecorder;

/// Name recorded when a tool reports an empty name
pub const INVALID_TOOL_NAME: &str = "__INVALID_TOOL__";

/// A guardrail whose verdicts are mirrored to telemetry.
///
/// Input guardrails are recorded on every evaluation, output guardrails once
/// per stream at finalization.
pub struct Telemetered<G> {
    inner: G,
    recorder: TelemetryRecorder,
}

impl<G> Telemetered<G> {
    pub fn new(inner: G, recorder: TelemetryRecorder) -> Self {
        Self { inner, recorder }
    }
}

#[async_trait]
impl<G: InputGuardrail> InputGuardrail for Telemetered<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn evaluate(&self, input: &str) -> GuardrailVerdict {
        let verdict = self.inner.evaluate(input).await;
        self.recorder.record_verdict(self.inner.name(), &verdict);
        verdict
    }
}

#[async_trait]
impl<G: OutputGuardrail> OutputGuardrail for Telemetered<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn on_chunk(&self, chunk: &str, state: &mut StreamState) -> String {
        self.inner.on_chunk(chunk, state)
    }

    fn flush(&self, state: &mut StreamState) -> String {
        self.inner.flush(state)
    }

    async fn finalize(&self, text: &str, state: &StreamState) -> GuardrailVerdict {
        let verdict = self.inner.finalize(text, state).await;
        self.recorder.record_verdict(self.inner.name(), &verdict);
        verdict
    }
}

/// A tool whose invocations are recorded, whether or not they succeed
pub struct ToolTelemetry<T> {
    inner: T,
    recorder: TelemetryRecorder,
}

impl<T> ToolTelemetry<T> {
    pub fn new(inner: T, recorder: TelemetryRecorder) -> Self {
        Self { inner, recorder }
    }
}

#[async_trait]
impl<T: Tool> Tool for ToolTelemetry<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(&self, args: Value, options: &ToolOptions) -> Result<Value, ToolError> {
        let recorded_args = args.clone();
        let result = self.inner.execute(args, options).await;

        let name = match self.inner.name() {
            "" => INVALID_TOOL_NAME,
            name => name,
        };
        self.recorder.record(
            EventType::Tool,
            name,
            "USED",
            json!({ "args": recorded_args }),
            options.conversation_id.clone(),
        );

        result
    }
}

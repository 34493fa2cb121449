//! Ordered chain of output guardrails and the per-stream session.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::domain::{GuardrailVerdict, StreamPart, VerdictAction};
use crate::telemetry::TelemetryRecorder;

use super::{DigitRedactor, OutputGuardrail, StreamState};

/// Output guardrails in configured order
#[derive(Default, Clone)]
pub struct OutputGuardrailChain {
    guardrails: Vec<Arc<dyn OutputGuardrail>>,
}

impl OutputGuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit to the end of the chain
    pub fn with(mut self, guardrail: impl OutputGuardrail + 'static) -> Self {
        self.guardrails.push(Arc::new(guardrail));
        self
    }

    /// Digit redactor, mirrored to telemetry
    pub fn standard(recorder: &TelemetryRecorder) -> Result<Self> {
        Ok(Self::new().with(recorder.guard(DigitRedactor::new()?)))
    }

    /// Unit names in evaluation order
    pub fn names(&self) -> Vec<&str> {
        self.guardrails.iter().map(|g| g.name()).collect()
    }

    /// Start a stream with fresh state for every unit
    pub fn begin(&self) -> OutputStream<'_> {
        OutputStream {
            chain: self,
            states: vec![StreamState::default(); self.guardrails.len()],
            text: String::new(),
        }
    }

    /// Guard a non-streamed answer as a single-chunk stream
    pub async fn guard_text(&self, text: &str) -> FinishedStream {
        let mut stream = self.begin();
        stream.push(StreamPart::text(text));
        stream.finish().await
    }
}

/// One output stream passing through the chain.
///
/// Owns the per-unit state from the first chunk until `finish`.
pub struct OutputStream<'a> {
    chain: &'a OutputGuardrailChain,
    states: Vec<StreamState>,
    text: String,
}

impl OutputStream<'_> {
    /// Transform one part; `None` when everything was held back for now
    pub fn push(&mut self, part: StreamPart) -> Option<StreamPart> {
        let mut chunk = match part {
            StreamPart::TextDelta { text } => text,
            other => return Some(other),
        };

        for (guardrail, state) in self.chain.guardrails.iter().zip(self.states.iter_mut()) {
            chunk = guardrail.on_chunk(&chunk, state);
        }

        if chunk.is_empty() {
            return None;
        }
        self.text.push_str(&chunk);
        Some(StreamPart::text(chunk))
    }

    /// Flush held-back text and run every unit's finalization
    pub async fn finish(mut self) -> FinishedStream {
        let mut tail = String::new();
        for (guardrail, state) in self.chain.guardrails.iter().zip(self.states.iter_mut()) {
            if !tail.is_empty() {
                tail = guardrail.on_chunk(&tail, state);
            }
            tail.push_str(&guardrail.flush(state));
        }
        self.text.push_str(&tail);

        let streamed = self.text.clone();
        let mut final_text = self.text;
        let mut modified = false;

        for (guardrail, state) in self.chain.guardrails.iter().zip(self.states.iter()) {
            let verdict = guardrail.finalize(&final_text, state).await;
            match verdict.action {
                VerdictAction::Block => {
                    info!(guardrail = guardrail.name(), "Output blocked");
                    return FinishedStream {
                        tail,
                        text: streamed,
                        verdict: verdict.with_metadata("guardrail", guardrail.name()),
                    };
                }
                VerdictAction::Modify => {
                    if let Some(replacement) = verdict.modified {
                        final_text = replacement;
                        modified = true;
                    }
                }
                VerdictAction::Allow => {}
            }
        }

        let verdict = if modified {
            GuardrailVerdict::modify(final_text)
        } else {
            GuardrailVerdict::allow()
        };

        FinishedStream {
            tail,
            text: streamed,
            verdict,
        }
    }
}

/// Result of finishing an output stream
#[derive(Debug, Clone)]
pub struct FinishedStream {
    /// Text released by the final flush, still to be forwarded downstream
    pub tail: String,

    /// Concatenation of every emitted chunk, tail included
    pub text: String,

    /// Combined finalization verdict
    pub verdict: GuardrailVerdict,
}

impl FinishedStream {
    /// Answer to hand back to the caller (None when blocked)
    pub fn output(&self) -> Option<&str> {
        match self.verdict.action {
            VerdictAction::Block => None,
            VerdictAction::Modify => self.verdict.modified.as_deref(),
            VerdictAction::Allow => Some(&self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> OutputGuardrailChain {
        OutputGuardrailChain::new().with(DigitRedactor::new().unwrap())
    }

    #[tokio::test]
    async fn test_non_text_parts_pass_through() {
        let chain = chain();
        let mut stream = chain.begin();
        let part = StreamPart::ToolCall {
            name: "calculate".to_string(),
            arguments: json!({"expression": "1234 + 5678"}),
        };

        assert_eq!(stream.push(part.clone()), Some(part));
    }

    #[tokio::test]
    async fn test_stream_with_two_long_runs() {
        let chain = chain();
        let mut stream = chain.begin();

        let mut forwarded = String::new();
        for chunk in ["call 0123456789", " or 98765", "43210 please"] {
            if let Some(StreamPart::TextDelta { text }) = stream.push(StreamPart::text(chunk)) {
                forwarded.push_str(&text);
            }
        }
        let finished = stream.finish().await;
        forwarded.push_str(&finished.tail);

        assert_eq!(forwarded, "call [digits] or [digits] please");
        assert_eq!(finished.text, forwarded);
        assert!(finished.verdict.is_modify());
        assert!(finished.output().unwrap().contains("2 sensitive number sequence(s)"));
    }

    #[tokio::test]
    async fn test_guard_text_without_digits() {
        let finished = chain().guard_text("plain answer").await;
        assert_eq!(finished.output(), Some("plain answer"));
        assert_eq!(finished.verdict, GuardrailVerdict::allow());
    }
}

//! Redaction of digit sequences in model output.
//!
//! Every run of four or more digits is replaced with a marker as it streams
//! by. Runs of ten or more are counted separately, and the finished answer
//! gets a notice when any were hidden. A trailing digit run is held back
//! until the next chunk arrives, so a number split across chunks is still
//! seen whole.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::domain::GuardrailVerdict;

use super::{OutputGuardrail, StreamState};

/// Replacement for a redacted digit run (contains no digits)
pub const DIGIT_MARKER: &str = "[digits]";

/// Redacts long digit sequences from streamed output
#[derive(Debug, Clone)]
pub struct DigitRedactor {
    counted: Regex,
    redacted: Regex,
}

impl DigitRedactor {
    pub const NAME: &'static str = "redact-digits";

    pub fn new() -> Result<Self> {
        Ok(Self {
            counted: Regex::new("[0-9]{10,}").context("invalid count pattern")?,
            redacted: Regex::new("[0-9]{4,}").context("invalid redaction pattern")?,
        })
    }

    fn redact(&self, text: &str, state: &mut StreamState) -> String {
        state.redaction_count += self.counted.find_iter(text).count();
        self.redacted.replace_all(text, DIGIT_MARKER).into_owned()
    }

    /// Notice appended to an answer with `count` hidden sequences
    pub fn notice(count: usize) -> String {
        format!(
            "Safety Notice: {} sensitive number sequence(s) were automatically hidden \
             to protect privacy and prevent accidental sharing of personal information.",
            count
        )
    }
}

/// Byte offset where the trailing ASCII digit run of `text` starts
fn trailing_digits_start(text: &str) -> usize {
    text.len()
        - text
            .bytes()
            .rev()
            .take_while(|b| b.is_ascii_digit())
            .count()
}

#[async_trait]
impl OutputGuardrail for DigitRedactor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_chunk(&self, chunk: &str, state: &mut StreamState) -> String {
        let mut text = std::mem::take(&mut state.pending);
        text.push_str(chunk);

        let held = text.split_off(trailing_digits_start(&text));
        state.pending = held;

        self.redact(&text, state)
    }

    fn flush(&self, state: &mut StreamState) -> String {
        let tail = std::mem::take(&mut state.pending);
        self.redact(&tail, state)
    }

    async fn finalize(&self, text: &str, state: &StreamState) -> GuardrailVerdict {
        let count = state.redaction_count;
        if count == 0 {
            return GuardrailVerdict::allow();
        }

        debug!(guardrail = Self::NAME, count, "digit sequences hidden");
        GuardrailVerdict::modify(format!("{}\n\n{}", text, Self::notice(count)))
            .with_metadata("redactionCount", count)
    }
}

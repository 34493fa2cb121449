//! Content-policy guardrails.
//!
//! Guardrails come in two shapes:
//! - Input guardrails evaluate raw user text before any other processing
//! - Output guardrails transform the streamed model answer chunk by chunk and
//!   then issue a verdict on the finished text
//!
//! Chains run their units in configured order. Units are composed with
//! telemetry at construction time (see `telemetry::Telemetered`).

pub mod digits;
pub mod input;
pub mod output;
pub mod sanitize;
pub mod validation;
pub mod words;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::GuardrailVerdict;

pub use digits::DigitRedactor;
pub use input::InputGuardrailChain;
pub use output::{FinishedStream, OutputGuardrailChain, OutputStream};
pub use sanitize::Sanitizer;
pub use validation::StructuralValidator;
pub use words::WordFilter;

/// A policy check applied to user input
#[async_trait]
pub trait InputGuardrail: Send + Sync {
    /// Name used in logs and telemetry
    fn name(&self) -> &str;

    /// Evaluate the (possibly already modified) input text
    async fn evaluate(&self, input: &str) -> GuardrailVerdict;
}

/// A policy check applied to streamed and finalized model output
#[async_trait]
pub trait OutputGuardrail: Send + Sync {
    /// Name used in logs and telemetry
    fn name(&self) -> &str;

    /// Transform one text fragment of the stream
    fn on_chunk(&self, chunk: &str, state: &mut StreamState) -> String;

    /// Release anything held back in `state` at the end of the stream
    fn flush(&self, state: &mut StreamState) -> String {
        std::mem::take(&mut state.pending)
    }

    /// Evaluate the full answer once streaming is done
    async fn finalize(&self, text: &str, state: &StreamState) -> GuardrailVerdict;
}

/// Per-stream accumulator owned by one output guardrail.
///
/// Created fresh for every stream and discarded after finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamState {
    /// Number of sensitive sequences hidden so far
    pub redaction_count: usize,

    /// Text held back until the next chunk (or the end of the stream)
    pub pending: String,
}

/// Policy limits for the standard guardrail chains
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailLimits {
    /// Terms rejected by the word filter (single words or phrases)
    #[serde(default = "default_blocked_words")]
    pub blocked_words: Vec<String>,

    /// Maximum input length in characters (default: 10,000)
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Minimum number of words (default: 1)
    #[serde(default = "default_min_words")]
    pub min_words: usize,
}

fn default_max_length() -> usize {
    10_000
}
fn default_min_words() -> usize {
    1
}

fn default_blocked_words() -> Vec<String> {
    [
        "hack", "bad", "hate", "kill", "violence", "abuse", "harass", "attack", "threat",
        "hurt", "die", "death", "suicide", "self harm", "kill yourself", "nsfw", "nude",
        "sexual", "sex", "porn", "explicit", "racist", "racism", "abusive", "offensive",
        "insult", "slur", "terror", "bomb", "explode", "weapon", "gun", "shoot", "stab",
        "hate speech", "bully", "bullying", "curse", "swear", "violent",
    ]
    .iter()
    .map(|word| word.to_string())
    .collect()
}

impl Default for GuardrailLimits {
    fn default() -> Self {
        Self {
            blocked_words: default_blocked_words(),
            max_length: default_max_length(),
            min_words: default_min_words(),
        }
    }
}

//! Structural input validation: emptiness, length, word count.

use async_trait::async_trait;

use crate::domain::GuardrailVerdict;

use super::{GuardrailLimits, InputGuardrail};

pub const EMPTY_MESSAGE: &str =
    "Your message is empty. Please enter a question or statement so I can assist you.";
pub const TOO_FEW_WORDS_MESSAGE: &str = "Your message does not contain enough meaningful content. Please add more details and try again.";

/// Validates input length and word count
#[derive(Debug, Clone)]
pub struct StructuralValidator {
    max_length: usize,
    min_words: usize,
}

impl StructuralValidator {
    pub const NAME: &'static str = "input-validation";

    pub fn new(max_length: usize, min_words: usize) -> Self {
        Self {
            max_length,
            min_words: min_words.max(1),
        }
    }

    pub fn from_limits(limits: &GuardrailLimits) -> Self {
        Self::new(limits.max_length, limits.min_words)
    }

    fn too_long_message(&self) -> String {
        format!(
            "Your message is too long. Please shorten it to under {} characters and try again.",
            group_thousands(self.max_length)
        )
    }
}

impl Default for StructuralValidator {
    fn default() -> Self {
        Self::from_limits(&GuardrailLimits::default())
    }
}

#[async_trait]
impl InputGuardrail for StructuralValidator {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn evaluate(&self, input: &str) -> GuardrailVerdict {
        let length = input.chars().count();

        if input.trim().is_empty() {
            return GuardrailVerdict::block(EMPTY_MESSAGE).with_metadata("inputLength", length);
        }

        if length > self.max_length {
            return GuardrailVerdict::block(self.too_long_message())
                .with_metadata("inputLength", length)
                .with_metadata("maxLength", self.max_length);
        }

        let word_count = input.split_whitespace().count();
        if word_count < self.min_words {
            return GuardrailVerdict::block(TOO_FEW_WORDS_MESSAGE)
                .with_metadata("wordCount", word_count)
                .with_metadata("minWords", self.min_words);
        }

        GuardrailVerdict::allow()
    }
}

/// 10000 -> "10,000"
fn group_thousands(value: usize) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

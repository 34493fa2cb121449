//! Restricted language filter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::domain::GuardrailVerdict;

use super::InputGuardrail;

/// Message shown to the user when a restricted term is found
pub const BLOCKED_WORD_MESSAGE: &str =
    "Your message contains restricted language. Please rephrase and try again.";

/// Blocks input containing a denylisted word or phrase.
///
/// Single words match on word boundaries; phrases also accept any run of
/// whitespace between their words. Matching is case-insensitive.
pub struct WordFilter {
    rules: Vec<(String, Regex)>,
}

impl WordFilter {
    pub const NAME: &'static str = "block-words";

    /// Compile the denylist
    pub fn new<S: AsRef<str>>(words: &[S]) -> Result<Self> {
        let rules = words
            .iter()
            .map(|word| word.as_ref().trim())
            .filter(|word| !word.is_empty())
            .map(|word| Ok((word.to_string(), compile_term(word)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// First denylisted term found in `text`
    pub fn find_match(&self, text: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(word, _)| word.as_str())
    }
}

fn compile_term(word: &str) -> Result<Regex> {
    let body = word
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");

    RegexBuilder::new(&format!(r"\b{}\b", body))
        .case_insensitive(true)
        .build()
        .with_context(|| format!("invalid denylist term '{}'", word))
}

#[async_trait]
impl InputGuardrail for WordFilter {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn evaluate(&self, input: &str) -> GuardrailVerdict {
        match self.find_match(input) {
            Some(word) => {
                warn!(guardrail = Self::NAME, matched = %word, "Restricted language detected");
                GuardrailVerdict::block(BLOCKED_WORD_MESSAGE)
                    .with_metadata("code", "BLOCKED_WORD")
                    .with_metadata("blockedWord", word)
            }
            None => {
                debug!(guardrail = Self::NAME, "passed");
                GuardrailVerdict::allow()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> WordFilter {
        WordFilter::new(&["kill", "self harm"]).unwrap()
    }

    #[test]
    fn test_whole_word_match_only() {
        let filter = filter();

        assert_eq!(filter.find_match("I will KILL this process"), Some("kill"));
        assert_eq!(filter.find_match("skills are useful"), None);
        assert_eq!(filter.find_match("killer whale"), None);
    }

    #[test]
    fn test_phrase_allows_flexible_whitespace() {
        let filter = filter();

        assert_eq!(filter.find_match("talk about self   harm"), Some("self harm"));
        assert_eq!(filter.find_match("self\tHarm"), Some("self harm"));
        assert_eq!(filter.find_match("selfharm"), None);
    }

    #[test]
    fn test_terms_are_escaped() {
        let filter = WordFilter::new(&["a.b"]).unwrap();
        assert!(filter.find_match("axb").is_none());
        assert!(filter.find_match("see a.b now").is_some());
    }

    #[tokio::test]
    async fn test_block_keeps_term_in_metadata_only() {
        let verdict = filter().evaluate("kill it").await;

        assert!(verdict.is_block());
        assert_eq!(verdict.metadata["blockedWord"], "kill");
        assert!(!verdict.message.unwrap().to_lowercase().contains("kill"));
    }
}

//! Removes email addresses and links from user input.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::domain::GuardrailVerdict;

use super::InputGuardrail;

pub const EMAIL_PLACEHOLDER: &str = "[email]";
pub const URL_PLACEHOLDER: &str = "[url]";

/// Notice attached to a sanitized message
pub const SANITIZED_NOTICE: &str = "For your safety, email addresses and website links were automatically removed from your message.";

/// Replaces emails and `http(s)://` links with placeholders
#[derive(Debug, Clone)]
pub struct Sanitizer {
    email: Regex,
    url: Regex,
}

impl Sanitizer {
    pub const NAME: &'static str = "sanitize-input";

    pub fn new() -> Result<Self> {
        Ok(Self {
            email: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .context("invalid email pattern")?,
            url: Regex::new(r"https?://\S+").context("invalid url pattern")?,
        })
    }

    /// Sanitized text; equal to the input when nothing matched
    pub fn sanitize(&self, input: &str) -> String {
        let without_emails = self.email.replace_all(input, EMAIL_PLACEHOLDER);
        self.url
            .replace_all(&without_emails, URL_PLACEHOLDER)
            .into_owned()
    }
}

#[async_trait]
impl InputGuardrail for Sanitizer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn evaluate(&self, input: &str) -> GuardrailVerdict {
        let sanitized = self.sanitize(input);
        if sanitized == input {
            return GuardrailVerdict::allow();
        }

        debug!(guardrail = Self::NAME, "removed contact details");
        let original_length = input.chars().count();
        let sanitized_length = sanitized.chars().count();

        GuardrailVerdict::modify(sanitized)
            .with_message(SANITIZED_NOTICE)
            .with_metadata("originalLength", original_length)
            .with_metadata("sanitizedLength", sanitized_length)
            .with_metadata("reason", "privacy_protection")
    }
}

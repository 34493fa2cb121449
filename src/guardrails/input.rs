//! Ordered chain of input guardrails.

use anyhow::Result;
use tracing::{debug, info};

use crate::domain::{GuardrailVerdict, VerdictAction};
use crate::telemetry::TelemetryRecorder;

use super::{GuardrailLimits, InputGuardrail, Sanitizer, StructuralValidator, WordFilter};

/// Runs input guardrails strictly in configured order.
///
/// The first blocking unit ends evaluation. A modifying unit's replacement
/// text is what every later unit sees.
#[derive(Default)]
pub struct InputGuardrailChain {
    guardrails: Vec<Box<dyn InputGuardrail>>,
}

impl InputGuardrailChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit to the end of the chain
    pub fn with(mut self, guardrail: impl InputGuardrail + 'static) -> Self {
        self.guardrails.push(Box::new(guardrail));
        self
    }

    /// Word filter, sanitizer, structural validator; each mirrored to telemetry
    pub fn standard(limits: &GuardrailLimits, recorder: &TelemetryRecorder) -> Result<Self> {
        Ok(Self::new()
            .with(recorder.guard(WordFilter::new(&limits.blocked_words)?))
            .with(recorder.guard(Sanitizer::new()?))
            .with(recorder.guard(StructuralValidator::from_limits(limits))))
    }

    /// Unit names in evaluation order
    pub fn names(&self) -> Vec<&str> {
        self.guardrails.iter().map(|g| g.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.guardrails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    /// Evaluate the chain.
    ///
    /// Returns the blocking verdict (tagged with the unit name), a Modify
    /// verdict carrying the final text when any unit changed it, or Allow.
    pub async fn evaluate(&self, input: &str) -> GuardrailVerdict {
        let mut text = input.to_string();
        let mut notices: Vec<String> = Vec::new();

        for guardrail in &self.guardrails {
            let verdict = guardrail.evaluate(&text).await;

            if verdict.is_block() || !verdict.pass {
                info!(guardrail = guardrail.name(), "Input blocked");
                let mut blocked = verdict;
                blocked.pass = false;
                blocked.action = VerdictAction::Block;
                return blocked.with_metadata("guardrail", guardrail.name());
            }

            if verdict.is_modify() {
                if let Some(replacement) = verdict.modified {
                    debug!(guardrail = guardrail.name(), "Input modified");
                    text = replacement;
                }
                notices.extend(verdict.message);
            }
        }

        if text == input {
            return GuardrailVerdict::allow();
        }

        let mut verdict = GuardrailVerdict::modify(text);
        if !notices.is_empty() {
            verdict = verdict.with_message(notices.join(" "));
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records the input it saw, then returns a fixed verdict
    struct Probe {
        name: &'static str,
        verdict: GuardrailVerdict,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl InputGuardrail for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn evaluate(&self, input: &str) -> GuardrailVerdict {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, input));
            self.verdict.clone()
        }
    }

    fn probe(name: &'static str, verdict: GuardrailVerdict, seen: &Arc<Mutex<Vec<String>>>) -> Probe {
        Probe {
            name,
            verdict,
            seen: Arc::clone(seen),
        }
    }

    #[tokio::test]
    async fn test_block_short_circuits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = InputGuardrailChain::new()
            .with(probe("first", GuardrailVerdict::block("stop"), &seen))
            .with(probe("second", GuardrailVerdict::allow(), &seen));

        let verdict = chain.evaluate("text").await;

        assert!(verdict.is_block());
        assert_eq!(verdict.metadata["guardrail"], "first");
        assert_eq!(*seen.lock().unwrap(), vec!["first:text".to_string()]);
    }

    #[tokio::test]
    async fn test_modifications_compose_left_to_right() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = InputGuardrailChain::new()
            .with(probe("a", GuardrailVerdict::modify("one"), &seen))
            .with(probe("b", GuardrailVerdict::modify("two"), &seen))
            .with(probe("c", GuardrailVerdict::allow(), &seen));

        let verdict = chain.evaluate("zero").await;

        assert!(verdict.is_modify());
        assert_eq!(verdict.modified.as_deref(), Some("two"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:zero".to_string(), "b:one".to_string(), "c:two".to_string()]
        );
    }

    #[tokio::test]
    async fn test_all_allow() {
        let chain = InputGuardrailChain::standard(
            &GuardrailLimits::default(),
            &TelemetryRecorder::disabled(),
        )
        .unwrap();

        assert_eq!(chain.names(), vec!["block-words", "sanitize-input", "input-validation"]);
        let verdict = chain.evaluate("what is the capital of France?").await;
        assert_eq!(verdict, GuardrailVerdict::allow());
    }
}

//! Guardrail Chain Integration Tests
//!
//! Exercises the standard input and output chains end to end, including the
//! telemetry they mirror to.

use std::sync::Arc;

use async_trait::async_trait;

use chatflow::domain::{EventType, GuardrailVerdict, StreamPart, VerdictAction};
use chatflow::guardrails::sanitize::SANITIZED_NOTICE;
use chatflow::guardrails::words::BLOCKED_WORD_MESSAGE;
use chatflow::guardrails::{
    GuardrailLimits, InputGuardrail, InputGuardrailChain, OutputGuardrailChain, Sanitizer,
};
use chatflow::telemetry::{MemoryTelemetrySink, TelemetryRecorder};

fn standard_chain() -> InputGuardrailChain {
    InputGuardrailChain::standard(&GuardrailLimits::default(), &TelemetryRecorder::disabled())
        .unwrap()
}

/// Blocks everything; proves later units are never consulted
struct Tripwire;

#[async_trait]
impl InputGuardrail for Tripwire {
    fn name(&self) -> &str {
        "tripwire"
    }

    async fn evaluate(&self, _input: &str) -> GuardrailVerdict {
        panic!("tripwire evaluated after a block");
    }
}

#[tokio::test]
async fn test_denylisted_word_blocks_first() {
    let limits = GuardrailLimits::default();
    let chain = InputGuardrailChain::standard(&limits, &TelemetryRecorder::disabled())
        .unwrap()
        .with(Tripwire);

    for input in ["I want to attack the server", "BOMB", "this is a Threat."] {
        let verdict = chain.evaluate(input).await;

        assert_eq!(verdict.action, VerdictAction::Block, "input: {}", input);
        assert_eq!(verdict.message.as_deref(), Some(BLOCKED_WORD_MESSAGE));
        assert_eq!(verdict.metadata["guardrail"], "block-words");
    }
}

#[tokio::test]
async fn test_block_message_never_echoes_term() {
    let verdict = standard_chain().evaluate("tell me how to hack a wifi router").await;

    assert!(verdict.is_block());
    let message = verdict.message.clone().unwrap_or_default().to_lowercase();
    assert!(!message.contains("hack"));

    // The match is kept for telemetry but stripped before leaving the API
    assert_eq!(verdict.metadata["blockedWord"], "hack");
    assert!(verdict.redacted().metadata.is_empty());
}

#[tokio::test]
async fn test_whole_words_only() {
    // "skill" contains "kill", "badge" contains "bad"
    let verdict = standard_chain().evaluate("my skill badge arrived").await;
    assert!(!verdict.is_block());
}

#[tokio::test]
async fn test_phrase_matches_across_whitespace() {
    let chain = InputGuardrailChain::new().with(
        chatflow::guardrails::WordFilter::new(&["self harm"]).unwrap(),
    );
    assert!(chain.evaluate("thoughts of self   harm").await.is_block());
    assert!(!chain.evaluate("self care and harmony").await.is_block());
}

#[tokio::test]
async fn test_sanitize_scenario() {
    let verdict = standard_chain()
        .evaluate("my email is a@b.com see http://x.com")
        .await;

    assert_eq!(verdict.action, VerdictAction::Modify);
    assert_eq!(
        verdict.modified.as_deref(),
        Some("my email is [email] see [url]")
    );
    assert_eq!(verdict.message.as_deref(), Some(SANITIZED_NOTICE));
}

#[tokio::test]
async fn test_sanitized_text_passes_unchanged() {
    let sanitizer = Sanitizer::new().unwrap();
    let once = sanitizer.sanitize("reach me at jo.doe+x@mail.example.org or https://example.com/a?b=c");

    assert_eq!(sanitizer.sanitize(&once), once);
    let verdict = standard_chain().evaluate(&once).await;
    assert_eq!(verdict.action, VerdictAction::Allow);
}

#[tokio::test]
async fn test_length_limit_scenario() {
    let verdict = standard_chain().evaluate(&"a".repeat(10_001)).await;

    assert!(verdict.is_block());
    assert_eq!(verdict.metadata["maxLength"], 10_000);
    assert_eq!(verdict.metadata["guardrail"], "input-validation");
    assert!(verdict.message.unwrap().contains("too long"));
}

#[tokio::test]
async fn test_validator_sees_sanitized_text() {
    // Sanitizing shrinks the input below the limit before validation runs
    let limits = GuardrailLimits {
        max_length: 40,
        ..GuardrailLimits::default()
    };
    let chain = InputGuardrailChain::standard(&limits, &TelemetryRecorder::disabled()).unwrap();

    let input = "see https://example.com/a/very/long/path/that/goes/on";
    assert!(input.chars().count() > 40);

    let verdict = chain.evaluate(input).await;
    assert_eq!(verdict.action, VerdictAction::Modify);
    assert_eq!(verdict.modified.as_deref(), Some("see [url]"));
}

#[tokio::test]
async fn test_two_long_runs_counted() {
    let chain = OutputGuardrailChain::standard(&TelemetryRecorder::disabled()).unwrap();
    let mut stream = chain.begin();

    let mut emitted = String::new();
    for chunk in ["acct 12345", "67890 and ", "card 4111111111", "111111 ok"] {
        if let Some(part) = stream.push(StreamPart::text(chunk)) {
            emitted.push_str(part.as_text().unwrap_or_default());
        }
    }
    let finished = stream.finish().await;
    emitted.push_str(&finished.tail);

    assert_eq!(emitted, "acct [digits] and card [digits] ok");
    assert_eq!(finished.text, emitted);
    assert!(!emitted.chars().any(|c| c.is_ascii_digit()));

    let output = finished.output().unwrap();
    assert!(output.starts_with(&emitted));
    assert!(output.contains("2 sensitive number sequence(s)"));
}

#[tokio::test]
async fn test_tool_parts_pass_through_output_chain() {
    let chain = OutputGuardrailChain::standard(&TelemetryRecorder::disabled()).unwrap();
    let mut stream = chain.begin();

    let call = StreamPart::ToolCall {
        name: "calculate".to_string(),
        arguments: serde_json::json!({ "expression": "1234 * 5678" }),
    };
    assert_eq!(stream.push(call.clone()), Some(call));
    assert_eq!(stream.finish().await.text, "");
}

#[tokio::test]
async fn test_verdicts_mirrored_to_telemetry() {
    let sink = Arc::new(MemoryTelemetrySink::new());
    let recorder = TelemetryRecorder::spawn(sink.clone());
    let chain = InputGuardrailChain::standard(&GuardrailLimits::default(), &recorder).unwrap();

    chain.evaluate("a perfectly ordinary question").await;
    chain.evaluate("I hate this").await;
    recorder.flush().await;

    let events = sink.events();
    assert!(events.iter().all(|e| e.event_type == EventType::Guardrail));

    let names: Vec<(&str, &str)> = events
        .iter()
        .map(|e| (e.name.as_str(), e.status.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("block-words", "PASSED"),
            ("sanitize-input", "PASSED"),
            ("input-validation", "PASSED"),
            ("block-words", "BLOCKED"),
        ]
    );
}

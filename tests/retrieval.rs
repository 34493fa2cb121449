//! Retrieval Gate Integration Tests
//!
//! Relevance filtering, context budgets and fail-open behavior, plus the
//! prompt each outcome produces.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use chatflow::adapters::{DocumentSearch, SearchHit};
use chatflow::conversation::{
    build_system_prompt, Mode, DOCUMENT_INSTRUCTIONS, NORMAL_INSTRUCTIONS,
};
use chatflow::retrieval::{RetrievalGate, RetrievalSettings};

/// Returns the same hits for every query
struct FixedSearch {
    hits: Vec<SearchHit>,
    calls: AtomicUsize,
}

impl FixedSearch {
    fn new(hits: &[(&str, f64)]) -> Arc<Self> {
        Arc::new(Self {
            hits: hits
                .iter()
                .map(|(content, score)| SearchHit {
                    content: content.to_string(),
                    score: *score,
                })
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DocumentSearch for FixedSearch {
    async fn search(&self, _query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
}

struct FailingSearch;

#[async_trait]
impl DocumentSearch for FailingSearch {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchHit>> {
        anyhow::bail!("vector store unavailable")
    }
}

struct SlowSearch;

#[async_trait]
impl DocumentSearch for SlowSearch {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchHit>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

fn gate(search: Arc<dyn DocumentSearch>) -> RetrievalGate {
    RetrievalGate::new(search, RetrievalSettings::default())
}

#[tokio::test]
async fn test_below_threshold_yields_general_prompt() {
    let search = FixedSearch::new(&[("refunds take 5 days", 0.74), ("shipping is free", 0.5)]);
    let context = gate(search.clone()).retrieve("how long do refunds take", 5).await;

    assert!(!context.has_context());
    assert_eq!(search.calls.load(Ordering::SeqCst), 1);

    let prompt = build_system_prompt(Mode::Normal, &context);
    assert_eq!(prompt, NORMAL_INSTRUCTIONS);
    assert!(!prompt.contains(DOCUMENT_INSTRUCTIONS));
}

#[tokio::test]
async fn test_relevant_documents_ground_the_prompt() {
    let search = FixedSearch::new(&[
        ("shipping is free", 0.76),
        ("off topic", 0.2),
        ("refunds take 5 days", 0.91),
    ]);
    let context = gate(search).retrieve("refunds", 5).await;

    let scores: Vec<f64> = context.documents.iter().map(|d| d.relevance_score).collect();
    assert_eq!(scores, vec![0.91, 0.76]);
    assert_eq!(context.context_text(), "refunds take 5 days\n\nshipping is free");

    let prompt = build_system_prompt(Mode::Normal, &context);
    assert!(prompt.starts_with(DOCUMENT_INSTRUCTIONS));
    assert!(prompt.ends_with("DOCUMENT SNIPPETS:\nrefunds take 5 days\n\nshipping is free"));
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let search = FixedSearch::new(&[("exactly at the bar", 0.75)]);
    let context = gate(search).retrieve("bar", 5).await;
    assert_eq!(context.documents.len(), 1);
}

#[tokio::test]
async fn test_greeting_prompt_ignores_documents() {
    let search = FixedSearch::new(&[("refunds take 5 days", 0.95)]);
    let context = gate(search).retrieve("hi", 5).await;
    assert!(context.has_context());

    let prompt = build_system_prompt(Mode::Simple, &context);
    assert!(!prompt.contains("refunds"));
}

#[tokio::test]
async fn test_context_budget_enforced() {
    let long = "x".repeat(2_500);
    let hits: Vec<(&str, f64)> = [0.9, 0.85, 0.8, 0.8, 0.8]
        .iter()
        .map(|score| (long.as_str(), *score))
        .collect();
    let context = gate(FixedSearch::new(&hits)).retrieve("x", 5).await;

    // Each snippet capped at 1,000 chars, the whole block at 4,000
    assert!(context.documents.iter().all(|d| d.content.chars().count() <= 1_000));
    assert!(context.context_text().chars().count() <= 4_000);
    assert_eq!(context.documents[0].content.chars().count(), 1_000);
}

#[tokio::test]
async fn test_search_failure_degrades_to_no_context() {
    let context = gate(Arc::new(FailingSearch)).retrieve("anything", 5).await;
    assert!(!context.has_context());
}

#[tokio::test]
async fn test_search_timeout_degrades_to_no_context() {
    let settings = RetrievalSettings {
        timeout_seconds: 1,
        ..RetrievalSettings::default()
    };
    let gate = RetrievalGate::new(Arc::new(SlowSearch), settings);

    let context = gate.retrieve("anything", 5).await;
    assert!(!context.has_context());
}

#[tokio::test]
async fn test_blank_query_skips_search() {
    let search = FixedSearch::new(&[("doc", 0.99)]);
    let context = gate(search.clone()).retrieve("   ", 5).await;

    assert!(!context.has_context());
    assert_eq!(search.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_disabled_gate_is_empty() {
    let context = RetrievalGate::disabled().retrieve("refunds", 5).await;
    assert!(!context.has_context());
}

//! Relevance-gated document retrieval.
//!
//! The gate asks the search collaborator for candidates, keeps only those at
//! or above the relevance threshold, and trims them to fit the prompt budget.
//! Search failures degrade to an empty context; they never fail a turn.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::{DocumentSearch, SearchHit};
use crate::domain::RetrievedDocument;

/// Separator placed between snippets in the context block
const SNIPPET_SEPARATOR: &str = "\n\n";

/// Retrieval limits and the optional search endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Minimum score a document needs to be used (default: 0.75)
    #[serde(default = "default_threshold")]
    pub relevance_threshold: f64,

    /// Candidates requested from the search collaborator (default: 5)
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Per-document character budget (default: 1,000)
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,

    /// Budget for all snippets together (default: 4,000)
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Search call timeout in seconds (default: 10)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// HTTP search endpoint; retrieval is off when unset
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_threshold() -> f64 {
    0.75
}

fn default_top_k() -> usize {
    5
}

fn default_snippet_chars() -> usize {
    1_000
}

fn default_max_context_chars() -> usize {
    4_000
}

fn default_timeout() -> u64 {
    10
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            relevance_threshold: default_threshold(),
            top_k: default_top_k(),
            snippet_chars: default_snippet_chars(),
            max_context_chars: default_max_context_chars(),
            timeout_seconds: default_timeout(),
            endpoint: None,
        }
    }
}

/// Documents accepted as grounding context for one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub documents: Vec<RetrievedDocument>,
}

impl RetrievalContext {
    pub fn has_context(&self) -> bool {
        !self.documents.is_empty()
    }

    /// Snippets joined into one block, best match first
    pub fn context_text(&self) -> String {
        self.documents
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join(SNIPPET_SEPARATOR)
    }
}

/// Filters search results by relevance before they reach the prompt
#[derive(Clone)]
pub struct RetrievalGate {
    search: Option<Arc<dyn DocumentSearch>>,
    settings: RetrievalSettings,
}

impl RetrievalGate {
    pub fn new(search: Arc<dyn DocumentSearch>, settings: RetrievalSettings) -> Self {
        Self {
            search: Some(search),
            settings,
        }
    }

    /// A gate with no collaborator; always yields an empty context
    pub fn disabled() -> Self {
        Self {
            search: None,
            settings: RetrievalSettings::default(),
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Search for `query` and keep the relevant results
    pub async fn retrieve(&self, query: &str, top_k: usize) -> RetrievalContext {
        let Some(search) = &self.search else {
            return RetrievalContext::default();
        };

        let query = query.trim();
        if query.is_empty() {
            return RetrievalContext::default();
        }

        let limit = Duration::from_secs(self.settings.timeout_seconds);
        let hits = match tokio::time::timeout(limit, search.search(query, top_k)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(error = %e, "Document search failed, answering without context");
                return RetrievalContext::default();
            }
            Err(_) => {
                warn!(timeout_secs = self.settings.timeout_seconds, "Document search timed out");
                return RetrievalContext::default();
            }
        };

        let candidates = hits.len();
        let context = self.select(hits);
        debug!(candidates, kept = context.documents.len(), "Retrieval filtered");
        context
    }

    /// Apply threshold, ordering and character budgets to raw hits
    pub fn select(&self, hits: Vec<SearchHit>) -> RetrievalContext {
        let mut relevant: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.score.is_finite() && hit.score >= self.settings.relevance_threshold)
            .collect();
        relevant.sort_by(|a, b| b.score.total_cmp(&a.score));

        let separator_len = SNIPPET_SEPARATOR.chars().count();
        let mut used = 0usize;
        let mut documents = Vec::new();

        for hit in relevant {
            let separator = if documents.is_empty() { 0 } else { separator_len };
            let remaining = self
                .settings
                .max_context_chars
                .saturating_sub(used + separator);
            if remaining == 0 {
                break;
            }

            let snippet = truncate_chars(hit.content.trim(), self.settings.snippet_chars.min(remaining));
            if snippet.is_empty() {
                continue;
            }

            used += separator + snippet.chars().count();
            documents.push(RetrievedDocument {
                content: snippet,
                relevance_score: hit.score,
            });
        }

        RetrievalContext { documents }
    }
}

/// First `max` characters of `text`
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((offset, _)) => text[..offset].to_string(),
        None => text.to_string(),
    }
}

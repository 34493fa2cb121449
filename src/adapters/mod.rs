//! Adapter interfaces for external systems.
//!
//! The engine depends on two collaborators: a chat model that streams an
//! answer, and a document search. HTTP implementations of both live here.

pub mod openrouter;
pub mod search;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::MemoryPolicy;
use crate::domain::{ChatMessage, StreamPart};
use crate::tools::ToolSet;

pub use openrouter::{ModelSettings, OpenRouterModel};
pub use search::HttpDocumentSearch;

/// Receives stream parts as the model produces them
pub trait ChunkSink: Send {
    fn push(&mut self, part: StreamPart);
}

/// Per-call options for the model
#[derive(Clone)]
pub struct GenerateOptions {
    pub user_id: String,
    pub conversation_id: String,
    pub memory: MemoryPolicy,
    pub tools: ToolSet,
}

/// The language model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Generate an answer, streaming parts into `sink`; returns the full text
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        sink: &mut dyn ChunkSink,
    ) -> Result<String>;
}

/// A search candidate before relevance filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub content: String,
    #[serde(alias = "similarity")]
    pub score: f64,
}

/// Similarity search over uploaded documents
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

//! HTTP document search client.
//!
//! Endpoint: POST <endpoint>
//! Body: {"query": "...", "topK": 5}
//! Response: [{"content": "...", "score": 0.81}, ...] (`similarity` accepted for `score`)

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{DocumentSearch, SearchHit};

/// Document search over HTTP
pub struct HttpDocumentSearch {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

impl HttpDocumentSearch {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DocumentSearch for HttpDocumentSearch {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest { query, top_k })
            .send()
            .await
            .context("Failed to reach document search")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Document search error ({}): {}", status, text)
        }

        response
            .json::<Vec<SearchHit>>()
            .await
            .context("Invalid document search response")
    }
}

//! Embedding provider trait and implementations.
//!
//! `OllamaEmbedder` talks to a local Ollama instance (nomic-embed-text,
//! 768-dim by default). `NoopEmbedder` always reports unavailable, which
//! puts retrieval into keyword-only mode.

use std::time::Duration;

use async_trait::async_trait;
use ndarray::Array1;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;

/// A source of query/content embeddings.
///
/// `embed` never fails: any trouble producing a vector (model not running,
/// timeout, malformed response) surfaces as `None` so callers can degrade
/// to lexical scoring.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. `None` means no embedding is available right now.
    async fn embed(&self, text: &str) -> Option<Array1<f32>>;

    /// Expected vector dimension.
    fn dimension(&self) -> usize;

    /// Whether the provider expects to produce embeddings at all.
    fn is_available(&self) -> bool;
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding provider backed by Ollama's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
    cache: EmbeddingCache,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, dimension: usize, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            timeout,
            cache: EmbeddingCache::default_cache(),
        }
    }

    async fn fetch_embedding(&self, text: &str) -> Option<Array1<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = match self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Embedding request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("Embedding request returned {}", response.status());
            return None;
        }

        let parsed: OllamaEmbeddingResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!("Malformed embedding response: {}", e);
                return None;
            }
        };

        if parsed.embedding.len() != self.dimension {
            warn!(
                "Embedding dimension {} does not match expected {}",
                parsed.embedding.len(),
                self.dimension
            );
            return None;
        }

        Some(Array1::from_vec(parsed.embedding))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Option<Array1<f32>> {
        if text.trim().is_empty() {
            return None;
        }

        if let Some(cached) = self.cache.get(text) {
            debug!("Embedding cache hit");
            return Some(cached);
        }

        let vector = self.fetch_embedding(text).await?;
        self.cache.put(text.to_string(), vector.clone());
        Some(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Provider that never produces embeddings (keyword-only deployments).
pub struct NoopEmbedder {
    dimension: usize,
}

impl NoopEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for NoopEmbedder {
    async fn embed(&self, _text: &str) -> Option<Array1<f32>> {
        None
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_embedder_reports_unavailable() {
        let embedder = NoopEmbedder::new(768);
        assert!(!embedder.is_available());
        assert_eq!(embedder.dimension(), 768);
        assert!(embedder.embed("any query").await.is_none());
    }

    #[tokio::test]
    async fn test_ollama_embedder_empty_text() {
        let embedder = OllamaEmbedder::new(
            "http://localhost:11434",
            "nomic-embed-text",
            768,
            Duration::from_secs(30),
        );
        assert!(embedder.embed("   ").await.is_none());
    }
}

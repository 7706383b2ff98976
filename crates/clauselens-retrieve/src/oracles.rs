//! Scoring oracle seam between the retrieval engine and the store.
//!
//! `RetrievalBackend` is the trait the service ranks against; the SQLite
//! store satisfies it via `StoreBackend`. Tests substitute deterministic
//! fakes.

use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array1;

use clauselens_core::Result;
use clauselens_store::{CandidateFilter, LexicalHit, SemanticHit, SqliteStore};

/// Everything the retrieval engine needs from the index.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Top candidates by descending cosine similarity, above the threshold.
    async fn semantic_hits(
        &self,
        embedding: &Array1<f32>,
        filter: &CandidateFilter,
        min_similarity: f32,
        top_k: usize,
    ) -> Result<Vec<SemanticHit>>;

    /// Top candidates by descending lexical score. Non-matching chunks are
    /// absent, not ranked last.
    async fn lexical_hits(
        &self,
        query: &str,
        filter: &CandidateFilter,
        top_k: usize,
    ) -> Result<Vec<LexicalHit>>;

    /// The parent document of a chunk, or `None` if the chunk is unknown.
    async fn chunk_document(&self, chunk_id: i64) -> Result<Option<i64>>;

    /// The stored embedding for a chunk, or `None` if it was never embedded.
    async fn chunk_embedding(&self, chunk_id: i64) -> Result<Option<Array1<f32>>>;
}

/// SQLite-backed oracle. Queries are local and fast enough to run on the
/// async runtime directly.
pub struct StoreBackend {
    store: Arc<SqliteStore>,
}

impl StoreBackend {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RetrievalBackend for StoreBackend {
    async fn semantic_hits(
        &self,
        embedding: &Array1<f32>,
        filter: &CandidateFilter,
        min_similarity: f32,
        top_k: usize,
    ) -> Result<Vec<SemanticHit>> {
        self.store.vector_search(embedding, filter, min_similarity, top_k)
    }

    async fn lexical_hits(
        &self,
        query: &str,
        filter: &CandidateFilter,
        top_k: usize,
    ) -> Result<Vec<LexicalHit>> {
        self.store.lexical_search(query, filter, top_k)
    }

    async fn chunk_document(&self, chunk_id: i64) -> Result<Option<i64>> {
        Ok(self.store.get_chunk(chunk_id)?.map(|c| c.doc_id))
    }

    async fn chunk_embedding(&self, chunk_id: i64) -> Result<Option<Array1<f32>>> {
        self.store.get_chunk_embedding(chunk_id)
    }
}

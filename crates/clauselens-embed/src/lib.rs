//! ClauseLens Embed — embedding providers and the query embedding cache.
//!
//! Providers return `Option<Array1<f32>>`: `None` means "no embedding
//! available right now" (model down, timeout), which downstream retrieval
//! treats as a signal to fall back to keyword-only scoring, never as an
//! error.

pub mod cache;
pub mod provider;

pub use cache::EmbeddingCache;
pub use provider::{EmbeddingProvider, NoopEmbedder, OllamaEmbedder};

//! ClauseLens Retrieve — hybrid semantic/keyword retrieval with weighted
//! Reciprocal Rank Fusion.
//!
//! The `RetrievalService` orchestrates two scoring oracles (vector
//! similarity and FTS5 lexical rank), fuses their rankings, and degrades
//! to keyword-only scoring when no query embedding can be produced.

pub mod fusion;
pub mod oracles;
pub mod service;
pub mod types;

pub use oracles::{RetrievalBackend, StoreBackend};
pub use service::RetrievalService;
pub use types::{ScoredCandidate, SearchMode, SearchOutcome, SearchQuery};

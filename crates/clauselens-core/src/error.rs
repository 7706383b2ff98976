//! Error types for ClauseLens.
//!
//! Embedding unavailability is deliberately NOT an error variant: the
//! embedding provider returns `Option` and callers degrade to keyword-only
//! search. Datastore failures, by contrast, have no fallback and propagate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Query text too short, or a limit/weight outside its allowed range.
    /// Client error; never retried.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Unrecognized search mode string at the API boundary.
    #[error("Invalid search mode: {0}")]
    InvalidSearchMode(String),

    /// Similar-chunk lookup on a chunk whose embedding was never generated.
    #[error("Chunk {0} has no embedding")]
    ChunkNotEmbedded(i64),

    /// Datastore failure. Fatal for the current request; no local recovery.
    #[error("Datastore error: {0}")]
    Datastore(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate content: hash={0}")]
    DuplicateContent(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

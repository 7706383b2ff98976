//! Configuration and data directory management.
//!
//! All tunables live in explicit immutable structs handed to the components
//! that need them — no ambient global settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Paths to all ClauseLens data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// SQLite database directory (`data/db/`).
    pub db: PathBuf,
    /// Uploaded contract files (`data/uploads/`).
    pub uploads: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            db: root.join("db"),
            uploads: root.join("uploads"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.db)?;
        std::fs::create_dir_all(&self.uploads)?;
        Ok(())
    }
}

/// Retrieval engine tunables.
///
/// Weights need not sum to 1 — the fusion engine trusts the caller's ratio
/// and never normalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum query text length accepted by the engine.
    pub min_query_len: usize,
    /// Default result limit when the caller does not specify one.
    pub default_limit: usize,
    /// Upper bound on the caller-supplied result limit.
    pub max_limit: usize,
    /// Default weight for the semantic RRF term.
    pub semantic_weight: f64,
    /// Default weight for the keyword RRF term.
    pub keyword_weight: f64,
    /// Minimum cosine similarity for semantic candidates; lower-scoring
    /// candidates are excluded entirely, not down-ranked.
    pub min_similarity: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_query_len: 3,
            default_limit: 10,
            max_limit: 50,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            min_similarity: 0.3,
        }
    }
}

/// Chunking sizes, tuned for legal documents (~1500 tokens ≈ 6000 chars).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Larger chunks with more overlap for clause/entity extraction,
    /// which needs more surrounding context.
    pub extraction_chunk_size: usize,
    pub extraction_chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 6000,
            chunk_overlap: 600,
            extraction_chunk_size: 2000,
            extraction_chunk_overlap: 500,
        }
    }
}

/// OCR escalation thresholds and collaborator endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Minimum per-tier confidence to accept an OCR result.
    pub confidence_threshold: f32,
    /// Base URL of the OCR sidecar service (native text, tesseract, render).
    pub sidecar_url: String,
    /// Vision model used for the last-resort tier.
    pub vision_model: String,
    /// Per-tier request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            sidecar_url: "http://localhost:8884".into(),
            vision_model: "llava".into(),
            timeout_secs: 120,
        }
    }
}

/// Top-level ClauseLens configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Ollama base URL for embeddings and generation.
    pub ollama_url: String,
    /// Chat model for clause/entity extraction.
    pub llm_model: String,
    /// Embedding model (nomic-embed-text, 768 dimensions).
    pub embedding_model: String,
    /// Embedding dimension; stored vectors must match exactly.
    pub embedding_dim: usize,
    /// Embedding request timeout in seconds. A timeout is treated the same
    /// as provider unavailability (keyword-only fallback), never a hard error.
    pub embed_timeout_secs: u64,
    /// Maximum upload size in bytes.
    pub max_file_size: usize,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub ocr: OcrConfig,
}

impl AppConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        let ollama_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| "http://localhost:11434".into());
        let llm_model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "llama3.2".into());
        let embedding_model =
            std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "nomic-embed-text".into());

        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            port,
            data_paths,
            ollama_url,
            llm_model,
            embedding_model,
            embedding_dim: 768,
            embed_timeout_secs: 30,
            max_file_size: 50 * 1024 * 1024,
            retrieval: RetrievalConfig::default(),
            chunking: ChunkingConfig::default(),
            ocr: OcrConfig::default(),
        })
    }
}

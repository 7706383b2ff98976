//! ClauseLens Core — configuration and error taxonomy.

pub mod config;
pub mod error;

pub use config::{AppConfig, ChunkingConfig, DataPaths, OcrConfig, RetrievalConfig};
pub use error::{Error, Result};

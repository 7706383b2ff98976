//! ClauseLens Ingest — text extraction and chunking for contract documents.
//!
//! Extraction escalates through quality-gated tiers (native text layer,
//! OCR sidecar, vision model) before the cleaned text is chunked for
//! indexing.

pub mod chunking;
pub mod ocr;
pub mod quality;

use sha2::{Digest, Sha256};

pub use chunking::{ContractChunker, DraftChunk};
pub use ocr::{ExtractedText, OcrPipeline, TierExtractor};

/// SHA-256 of raw file bytes, used for upload deduplication.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

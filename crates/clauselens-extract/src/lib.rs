//! ClauseLens Extract — LLM-backed clause and entity extraction for
//! M&A due diligence.
//!
//! Extraction prompts a local model per text window, parses its JSON
//! tolerantly, and post-processes with keyword risk scoring and
//! deduplication. The model is advisory: invalid or hallucinated output
//! is dropped, never stored.

pub mod clauses;
pub mod entities;
pub mod llm;

pub use clauses::{ClauseExtractor, ParsedClause};
pub use entities::{EntityExtractor, ParsedEntity, RawRelationship, ResolvedRelationship};
pub use llm::LlmClient;

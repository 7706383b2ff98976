//! Data types for documents, chunks, clauses, entities, and oracle hits.

use serde::{Deserialize, Serialize};

/// A contract document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i64>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub uploaded_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<i64>,
}

/// A chunk row. The embedding lives in a separate table and may be
/// regenerated independently of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub doc_id: i64,
    pub chunk_index: i32,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

/// An extracted clause row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    pub id: i64,
    pub doc_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<i64>,
    pub clause_type: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

/// An extracted entity row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub doc_id: i64,
    pub entity_type: String,
    pub name: String,
    pub normalized_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    pub created_at: i64,
}

/// A relationship between two entities of the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub doc_id: i64,
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub relationship_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Candidate-selection predicate shared by both scoring oracles.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateFilter {
    /// Restrict to a single document.
    pub document_id: Option<i64>,
    /// Exclude one document (find-similar across documents).
    pub exclude_document_id: Option<i64>,
    /// Exclude one chunk (the find-similar source chunk).
    pub exclude_chunk_id: Option<i64>,
}

impl CandidateFilter {
    pub fn for_document(document_id: Option<i64>) -> Self {
        Self {
            document_id,
            ..Default::default()
        }
    }

    fn admits(&self, chunk_id: i64, doc_id: i64) -> bool {
        if let Some(want) = self.document_id {
            if doc_id != want {
                return false;
            }
        }
        if self.exclude_document_id == Some(doc_id) {
            return false;
        }
        if self.exclude_chunk_id == Some(chunk_id) {
            return false;
        }
        true
    }

    /// Visible for the in-memory vector scan.
    pub(crate) fn admits_row(&self, chunk_id: i64, doc_id: i64) -> bool {
        self.admits(chunk_id, doc_id)
    }
}

/// A hit from the vector similarity oracle, ordered by descending similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    pub chunk_id: i64,
    pub doc_id: i64,
    pub document_name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
}

/// A hit from the FTS5 lexical oracle, ordered by descending score.
/// Chunks that do not match the query are absent, not ranked last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalHit {
    pub chunk_id: i64,
    pub doc_id: i64,
    pub document_name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    /// Non-negative, unbounded lexical rank score.
    pub score: f64,
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_documents: i64,
    pub completed_documents: i64,
    pub total_chunks: i64,
    pub chunks_with_embeddings: i64,
    pub clauses_extracted: i64,
    pub embedding_dimension: usize,
    pub db_size_mb: f64,
    pub matrix_rows: usize,
}

/// Options for adding a document.
#[derive(Debug, Clone, Default)]
pub struct AddDocumentOptions {
    pub file_size: Option<i64>,
    pub file_type: Option<String>,
    pub content_hash: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Fields for inserting a clause.
#[derive(Debug, Clone)]
pub struct NewClause {
    pub doc_id: i64,
    pub chunk_id: Option<i64>,
    pub clause_type: String,
    pub content: String,
    pub summary: Option<String>,
    pub risk_level: Option<String>,
    pub confidence: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

/// Fields for inserting an entity.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub doc_id: i64,
    pub entity_type: String,
    pub name: String,
    pub normalized_name: String,
    pub value: Option<String>,
    pub confidence: Option<f64>,
    pub context: Option<String>,
    pub page_number: Option<i32>,
}

/// Clause search filters for the `/search/clauses` surface.
#[derive(Debug, Clone, Default)]
pub struct ClauseFilter {
    pub clause_type: Option<String>,
    pub risk_level: Option<String>,
    pub document_id: Option<i64>,
    pub content_query: Option<String>,
    pub limit: usize,
}

//! SQLite store: document/chunk/clause/entity persistence, FTS5 lexical
//! scoring, and cosine similarity over an in-memory normalized matrix.
//!
//! The two search entry points (`lexical_search`, `vector_search`) are the
//! scoring oracles consumed by the retrieval engine. Both honor the same
//! `CandidateFilter` and are deterministic for a fixed index: equal scores
//! keep insertion order.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Axis};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::embedding::QuantizedEmbedding;
use crate::schema::{FTS_SCHEMA_SQL, FTS_TRIGGERS_SQL, SCHEMA_SQL};
use crate::types::*;
use clauselens_core::{Error, Result};

/// SQLite store with FTS5 full-text search and int8 vector search.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    embedding_dim: usize,
    /// Pre-loaded normalized embedding matrix for vector search: (N, dim) float32.
    embedding_matrix: Mutex<EmbeddingMatrix>,
}

struct EmbeddingMatrix {
    /// Normalized embeddings, shape (N, dim).
    matrix: Array2<f32>,
    /// Chunk IDs corresponding to each row.
    chunk_ids: Vec<i64>,
    /// Parent document IDs per row, for filter pushdown.
    doc_ids: Vec<i64>,
    /// Whether the matrix needs reloading.
    dirty: bool,
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

impl SqliteStore {
    /// Open or create the SQLite store.
    ///
    /// `db_dir` is the directory (e.g., `data/db/`). The file will be
    /// `db_dir/clauselens.db`.
    pub fn open(db_dir: impl AsRef<Path>, embedding_dim: usize) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("clauselens.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
            embedding_dim,
            embedding_matrix: Mutex::new(EmbeddingMatrix {
                matrix: Array2::zeros((0, embedding_dim)),
                chunk_ids: Vec::new(),
                doc_ids: Vec::new(),
                dirty: true,
            }),
        };

        store.load_embedding_matrix()?;

        let doc_count = store.count_documents()?;
        let chunk_count = store.count_chunks()?;
        info!(
            "SqliteStore initialized: {} documents, {} chunks, dim={}, path={}",
            doc_count,
            chunk_count,
            embedding_dim,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Datastore(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -65536;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!("{}\n{}\n{}", SCHEMA_SQL, FTS_SCHEMA_SQL, FTS_TRIGGERS_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Datastore(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Document CRUD
    // ---------------------------------------------------------------

    /// Insert a document. Returns the new document ID.
    pub fn add_document(&self, filename: &str, opts: AddDocumentOptions) -> Result<i64> {
        let now = now_millis();
        let meta_json = opts
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m))
            .transpose()?;

        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO documents (filename, file_size, file_type, content_hash, \
                 status, metadata_json, uploaded_at) \
                 VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6)",
            )
            .map_err(|e| Error::Datastore(e.to_string()))?
            .insert(params![
                filename,
                opts.file_size,
                opts.file_type,
                opts.content_hash,
                meta_json,
                now
            ])
            .map_err(|e| {
                if e.to_string().contains("UNIQUE constraint") {
                    Error::DuplicateContent(opts.content_hash.clone().unwrap_or_default())
                } else {
                    Error::Datastore(e.to_string())
                }
            })?;
        Ok(id)
    }

    /// Get a document by ID.
    pub fn get_document(&self, doc_id: i64) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM documents WHERE id = ?1")
            .map_err(|e| Error::Datastore(e.to_string()))?
            .query_row(params![doc_id], |row| Ok(Self::row_to_document(row)))
            .optional()
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(row)
    }

    /// Find a document by content hash (upload dedup).
    pub fn find_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM documents WHERE content_hash = ?1")
            .map_err(|e| Error::Datastore(e.to_string()))?
            .query_row(params![content_hash], |row| Ok(Self::row_to_document(row)))
            .optional()
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(row)
    }

    /// List documents, newest first.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM documents ORDER BY uploaded_at DESC")
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok(Self::row_to_document(row)))
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a document and everything hanging off it (cascade).
    pub fn delete_document(&self, doc_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM documents WHERE id = ?1", params![doc_id])
            .map_err(|e| Error::Datastore(e.to_string()))?;
        if count > 0 {
            drop(conn);
            self.embedding_matrix.lock().dirty = true;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Update processing status. Sets `processed_at` on terminal states.
    pub fn update_document_status(
        &self,
        doc_id: i64,
        status: &str,
        page_count: Option<i64>,
    ) -> Result<bool> {
        let processed_at = matches!(status, "completed" | "failed").then(now_millis);
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE documents SET status = ?1, \
                 page_count = COALESCE(?2, page_count), \
                 processed_at = COALESCE(?3, processed_at) \
                 WHERE id = ?4",
                params![status, page_count, processed_at, doc_id],
            )
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(count > 0)
    }

    /// Count total documents.
    pub fn count_documents(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(|e| Error::Datastore(e.to_string()))
    }

    // ---------------------------------------------------------------
    // Chunk CRUD
    // ---------------------------------------------------------------

    /// Insert a chunk. The (doc_id, chunk_index) pair is unique per document.
    pub fn add_chunk(
        &self,
        doc_id: i64,
        content: &str,
        chunk_index: i32,
        page_number: Option<i32>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let meta_json = metadata.map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO chunks (doc_id, chunk_index, content, page_number, \
                 metadata_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(|e| Error::Datastore(e.to_string()))?
            .insert(params![
                doc_id,
                chunk_index,
                content,
                page_number,
                meta_json,
                now_millis()
            ])
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(id)
    }

    /// Get a chunk by ID.
    pub fn get_chunk(&self, chunk_id: i64) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM chunks WHERE id = ?1")
            .map_err(|e| Error::Datastore(e.to_string()))?
            .query_row(params![chunk_id], |row| Ok(Self::row_to_chunk(row)))
            .optional()
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(row)
    }

    /// Get all chunks for a document in ordinal order.
    pub fn get_chunks_for_document(&self, doc_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM chunks WHERE doc_id = ?1 ORDER BY chunk_index")
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map(params![doc_id], |row| Ok(Self::row_to_chunk(row)))
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Count total chunks.
    pub fn count_chunks(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| Error::Datastore(e.to_string()))
    }

    // ---------------------------------------------------------------
    // Embeddings
    // ---------------------------------------------------------------

    /// Store a quantized embedding for a chunk.
    ///
    /// Wrong-dimension vectors are rejected outright: a mismatched vector
    /// would silently poison every cosine score in the index.
    pub fn add_chunk_embedding(&self, chunk_id: i64, embedding: &Array1<f32>) -> Result<()> {
        if embedding.len() != self.embedding_dim {
            return Err(Error::Datastore(format!(
                "embedding dimension {} does not match index dimension {}",
                embedding.len(),
                self.embedding_dim
            )));
        }
        let stored = QuantizedEmbedding::from_vector(embedding);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO chunk_embeddings (chunk_id, embedding, scale, offset_val) \
             VALUES (?1, ?2, ?3, ?4)",
            params![chunk_id, stored.bytes, stored.scale, stored.offset],
        )
        .map_err(|e| Error::Datastore(e.to_string()))?;
        let doc_id: i64 = conn
            .query_row(
                "SELECT doc_id FROM chunks WHERE id = ?1",
                params![chunk_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Datastore(e.to_string()))?;
        drop(conn);
        self.upsert_matrix_row(chunk_id, doc_id, embedding)
    }

    /// Get the stored (dequantized) embedding for a chunk, if any.
    pub fn get_chunk_embedding(&self, chunk_id: i64) -> Result<Option<Array1<f32>>> {
        let conn = self.conn.lock();
        let row: Option<(Vec<u8>, f64, f64)> = conn
            .prepare_cached(
                "SELECT embedding, scale, offset_val FROM chunk_embeddings WHERE chunk_id = ?1",
            )
            .map_err(|e| Error::Datastore(e.to_string()))?
            .query_row(params![chunk_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(row.map(|(blob, scale, offset)| {
            QuantizedEmbedding::from_parts(blob, scale as f32, offset as f32).to_vector()
        }))
    }

    /// Fold a single embedding into the in-memory matrix without a full
    /// reload. A regenerated embedding replaces its chunk's existing row in
    /// place; a dirty matrix is left for the next search to rebuild wholesale.
    fn upsert_matrix_row(&self, chunk_id: i64, doc_id: i64, embedding: &Array1<f32>) -> Result<()> {
        let norm = embedding.dot(embedding).sqrt();

        let mut mat = self.embedding_matrix.lock();
        if mat.dirty {
            return Ok(());
        }

        let existing = mat.chunk_ids.iter().position(|&id| id == chunk_id);
        if norm < 1e-9 {
            // A zero vector has no normalized row; if it replaces a live one,
            // only a rebuild can evict the stale row.
            if existing.is_some() {
                mat.dirty = true;
            }
            return Ok(());
        }
        let normalized = embedding / norm;

        if let Some(pos) = existing {
            mat.matrix.row_mut(pos).assign(&normalized);
            mat.doc_ids[pos] = doc_id;
            return Ok(());
        }

        if mat.matrix.nrows() == 0 {
            mat.matrix = normalized.insert_axis(Axis(0)).to_owned();
        } else {
            mat.matrix
                .push(Axis(0), normalized.view())
                .map_err(|e| Error::Storage(format!("Matrix append failed: {}", e)))?;
        }
        mat.chunk_ids.push(chunk_id);
        mat.doc_ids.push(doc_id);
        Ok(())
    }

    /// Load and normalize all chunk embeddings into a matrix for fast search.
    fn load_embedding_matrix(&self) -> Result<()> {
        let mut chunk_ids = Vec::new();
        let mut doc_ids = Vec::new();
        let mut embeddings: Vec<Array1<f32>> = Vec::new();

        {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT ce.chunk_id, c.doc_id, ce.embedding, ce.scale, ce.offset_val \
                     FROM chunk_embeddings ce \
                     JOIN chunks c ON c.id = ce.chunk_id \
                     ORDER BY ce.chunk_id",
                )
                .map_err(|e| Error::Datastore(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| {
                    let chunk_id: i64 = row.get(0)?;
                    let doc_id: i64 = row.get(1)?;
                    let blob: Vec<u8> = row.get(2)?;
                    let scale: f64 = row.get(3)?;
                    let offset: f64 = row.get(4)?;
                    Ok((chunk_id, doc_id, blob, scale as f32, offset as f32))
                })
                .map_err(|e| Error::Datastore(e.to_string()))?;

            for row in rows {
                let (cid, did, blob, scale, offset) =
                    row.map_err(|e| Error::Datastore(e.to_string()))?;
                chunk_ids.push(cid);
                doc_ids.push(did);
                embeddings.push(QuantizedEmbedding::from_parts(blob, scale, offset).to_vector());
            }
        }

        let mut mat = self.embedding_matrix.lock();
        if embeddings.is_empty() {
            mat.matrix = Array2::zeros((0, self.embedding_dim));
            mat.chunk_ids = Vec::new();
            mat.doc_ids = Vec::new();
            mat.dirty = false;
            return Ok(());
        }

        let n = embeddings.len();
        let mut matrix = Array2::zeros((n, self.embedding_dim));
        for (i, emb) in embeddings.iter().enumerate() {
            matrix.row_mut(i).assign(emb);
        }

        // Normalize rows so cosine similarity is a dot product
        for mut row in matrix.rows_mut() {
            let norm = row.dot(&row).sqrt();
            if norm > 1e-9 {
                row /= norm;
            }
        }

        mat.matrix = matrix;
        mat.chunk_ids = chunk_ids;
        mat.doc_ids = doc_ids;
        mat.dirty = false;
        debug!("Loaded {} embeddings into matrix", n);
        Ok(())
    }

    fn ensure_matrix_loaded(&self) -> Result<()> {
        if self.embedding_matrix.lock().dirty {
            self.load_embedding_matrix()?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Vector similarity oracle
    // ---------------------------------------------------------------

    /// Top-N chunks by descending cosine similarity.
    ///
    /// Candidates below `min_similarity` are excluded entirely. Ties keep
    /// matrix insertion order (stable sort), so repeated searches over an
    /// unchanged index return identical results.
    pub fn vector_search(
        &self,
        query_embedding: &Array1<f32>,
        filter: &CandidateFilter,
        min_similarity: f32,
        top_k: usize,
    ) -> Result<Vec<SemanticHit>> {
        self.ensure_matrix_loaded()?;

        let selected: Vec<(i64, f32)> = {
            let mat = self.embedding_matrix.lock();
            if mat.matrix.nrows() == 0 {
                return Ok(Vec::new());
            }

            let q_norm = query_embedding.dot(query_embedding).sqrt();
            if q_norm < 1e-9 {
                return Ok(Vec::new());
            }
            let q = query_embedding / q_norm;

            // (N, dim) @ (dim,) → (N,)
            let similarities = mat.matrix.dot(&q);

            let mut indexed: Vec<(usize, f32)> =
                similarities.iter().enumerate().map(|(i, &s)| (i, s)).collect();
            indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            indexed
                .into_iter()
                .filter(|&(i, s)| {
                    s >= min_similarity && filter.admits_row(mat.chunk_ids[i], mat.doc_ids[i])
                })
                .take(top_k)
                .map(|(i, s)| (mat.chunk_ids[i], s))
                .collect()
        };

        let mut hits = Vec::with_capacity(selected.len());
        for (chunk_id, similarity) in selected {
            if let Some((chunk, document_name)) = self.chunk_with_document(chunk_id)? {
                hits.push(SemanticHit {
                    chunk_id: chunk.id,
                    doc_id: chunk.doc_id,
                    document_name,
                    content: chunk.content,
                    page_number: chunk.page_number,
                    similarity,
                });
            }
        }
        Ok(hits)
    }

    fn chunk_with_document(&self, chunk_id: i64) -> Result<Option<(Chunk, String)>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached(
                "SELECT c.*, d.filename AS document_name FROM chunks c \
                 JOIN documents d ON d.id = c.doc_id WHERE c.id = ?1",
            )
            .map_err(|e| Error::Datastore(e.to_string()))?
            .query_row(params![chunk_id], |row| {
                let name: String = row.get("document_name")?;
                Ok((Self::row_to_chunk(row), name))
            })
            .optional()
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(row)
    }

    // ---------------------------------------------------------------
    // Lexical oracle (FTS5)
    // ---------------------------------------------------------------

    /// Full-text search using FTS5 BM25 ranking, ordered by descending score.
    ///
    /// Non-matching chunks are absent from the result, not ranked last.
    pub fn lexical_search(
        &self,
        query: &str,
        filter: &CandidateFilter,
        top_k: usize,
    ) -> Result<Vec<LexicalHit>> {
        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT c.id, c.doc_id, d.filename AS document_name, c.content, \
             c.page_number, chunks_fts.rank AS bm25_score \
             FROM chunks_fts \
             JOIN chunks c ON c.id = chunks_fts.rowid \
             JOIN documents d ON d.id = c.doc_id \
             WHERE chunks_fts MATCH ?1",
        );
        let mut bind: Vec<rusqlite::types::Value> = vec![fts_query.into()];
        if let Some(doc_id) = filter.document_id {
            bind.push(doc_id.into());
            sql.push_str(&format!(" AND c.doc_id = ?{}", bind.len()));
        }
        if let Some(doc_id) = filter.exclude_document_id {
            bind.push(doc_id.into());
            sql.push_str(&format!(" AND c.doc_id != ?{}", bind.len()));
        }
        if let Some(chunk_id) = filter.exclude_chunk_id {
            bind.push(chunk_id.into());
            sql.push_str(&format!(" AND c.id != ?{}", bind.len()));
        }
        bind.push((top_k as i64).into());
        sql.push_str(&format!(" ORDER BY chunks_fts.rank LIMIT ?{}", bind.len()));

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&sql)
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind), |row| {
                let bm25_score: f64 = row.get("bm25_score").unwrap_or(0.0);
                Ok(LexicalHit {
                    chunk_id: row.get("id")?,
                    doc_id: row.get("doc_id")?,
                    document_name: row.get("document_name")?,
                    content: row.get("content")?,
                    page_number: row.get("page_number")?,
                    score: -bm25_score, // FTS5 rank is negative; negate for positive
                })
            })
            .map_err(|e| Error::Datastore(e.to_string()))?;

        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Sanitize a user query for FTS5 MATCH syntax.
    /// Wraps each token in double quotes and joins with OR.
    fn sanitize_fts_query(query: &str) -> String {
        let tokens: Vec<String> = query
            .split_whitespace()
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect();
        tokens.join(" OR ")
    }

    // ---------------------------------------------------------------
    // Clauses
    // ---------------------------------------------------------------

    /// Insert an extracted clause. Returns the new clause ID.
    pub fn add_clause(&self, clause: &NewClause) -> Result<i64> {
        let meta_json = clause
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO clauses (doc_id, chunk_id, clause_type, content, summary, \
                 risk_level, confidence, metadata_json, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(|e| Error::Datastore(e.to_string()))?
            .insert(params![
                clause.doc_id,
                clause.chunk_id,
                clause.clause_type,
                clause.content,
                clause.summary,
                clause.risk_level,
                clause.confidence,
                meta_json,
                now_millis()
            ])
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(id)
    }

    /// Remove all clauses for a document (re-extraction wipes old results).
    pub fn delete_clauses_for_document(&self, doc_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM clauses WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| Error::Datastore(e.to_string()))
    }

    /// Get all clauses for a document, newest first.
    pub fn clauses_for_document(&self, doc_id: i64) -> Result<Vec<Clause>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM clauses WHERE doc_id = ?1 ORDER BY created_at DESC")
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map(params![doc_id], |row| Ok(Self::row_to_clause(row)))
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Search clauses by type/risk/document, with an optional substring
    /// filter on content.
    pub fn search_clauses(&self, filter: &ClauseFilter) -> Result<Vec<Clause>> {
        let mut sql = String::from("SELECT * FROM clauses WHERE 1=1");
        let mut bind: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(ct) = &filter.clause_type {
            bind.push(ct.clone().into());
            sql.push_str(&format!(" AND clause_type = ?{}", bind.len()));
        }
        if let Some(rl) = &filter.risk_level {
            bind.push(rl.clone().into());
            sql.push_str(&format!(" AND risk_level = ?{}", bind.len()));
        }
        if let Some(doc_id) = filter.document_id {
            bind.push(doc_id.into());
            sql.push_str(&format!(" AND doc_id = ?{}", bind.len()));
        }
        bind.push((filter.limit.max(1) as i64).into());
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{}", bind.len()));

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind), |row| {
                Ok(Self::row_to_clause(row))
            })
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let mut clauses: Vec<Clause> = rows.filter_map(|r| r.ok()).collect();

        if let Some(q) = &filter.content_query {
            let q_lower = q.to_lowercase();
            clauses.retain(|c| c.content.to_lowercase().contains(&q_lower));
        }
        Ok(clauses)
    }

    /// Clause counts grouped by type, descending.
    pub fn clause_type_counts(&self) -> Result<Vec<(String, i64)>> {
        self.grouped_counts("SELECT clause_type, COUNT(*) FROM clauses GROUP BY clause_type ORDER BY COUNT(*) DESC")
    }

    /// Clause counts grouped by risk level, descending.
    pub fn risk_level_counts(&self) -> Result<Vec<(String, i64)>> {
        self.grouped_counts(
            "SELECT risk_level, COUNT(*) FROM clauses WHERE risk_level IS NOT NULL \
             GROUP BY risk_level ORDER BY COUNT(*) DESC",
        )
    }

    fn grouped_counts(&self, sql: &str) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------
    // Entities & relationships
    // ---------------------------------------------------------------

    /// Insert an extracted entity. Returns the new entity ID.
    pub fn add_entity(&self, entity: &NewEntity) -> Result<i64> {
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO entities (doc_id, entity_type, name, normalized_name, value, \
                 confidence, context, page_number, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(|e| Error::Datastore(e.to_string()))?
            .insert(params![
                entity.doc_id,
                entity.entity_type,
                entity.name,
                entity.normalized_name,
                entity.value,
                entity.confidence,
                entity.context,
                entity.page_number,
                now_millis()
            ])
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(id)
    }

    /// Remove all entities (and, via cascade, relationships) for a document.
    pub fn delete_entities_for_document(&self, doc_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM entities WHERE doc_id = ?1", params![doc_id])
            .map_err(|e| Error::Datastore(e.to_string()))
    }

    /// Get all entities for a document.
    pub fn entities_for_document(&self, doc_id: i64) -> Result<Vec<Entity>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM entities WHERE doc_id = ?1 ORDER BY id")
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map(params![doc_id], |row| Ok(Self::row_to_entity(row)))
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Insert a relationship between two entities.
    pub fn add_relationship(
        &self,
        doc_id: i64,
        source_entity_id: i64,
        target_entity_id: i64,
        relationship_type: &str,
        description: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        let id = conn
            .prepare_cached(
                "INSERT INTO relationships (doc_id, source_entity_id, target_entity_id, \
                 relationship_type, description, confidence, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(|e| Error::Datastore(e.to_string()))?
            .insert(params![
                doc_id,
                source_entity_id,
                target_entity_id,
                relationship_type,
                description,
                confidence,
                now_millis()
            ])
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(id)
    }

    /// Get all relationships for a document.
    pub fn relationships_for_document(&self, doc_id: i64) -> Result<Vec<Relationship>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM relationships WHERE doc_id = ?1 ORDER BY id")
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let rows = stmt
            .query_map(params![doc_id], |row| {
                Ok(Relationship {
                    id: row.get("id").unwrap_or(0),
                    doc_id: row.get("doc_id").unwrap_or(0),
                    source_entity_id: row.get("source_entity_id").unwrap_or(0),
                    target_entity_id: row.get("target_entity_id").unwrap_or(0),
                    relationship_type: row.get("relationship_type").unwrap_or_default(),
                    description: row.get("description").ok().flatten(),
                    confidence: row.get("confidence").ok().flatten(),
                })
            })
            .map_err(|e| Error::Datastore(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    /// Get store statistics for the `/search/stats` surface.
    pub fn get_stats(&self) -> Result<StoreStats> {
        let total_documents = self.count_documents()?;
        let total_chunks = self.count_chunks()?;

        let conn = self.conn.lock();
        let completed_documents: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE status = 'completed'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let chunks_with_embeddings: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunk_embeddings", [], |row| row.get(0))
            .map_err(|e| Error::Datastore(e.to_string()))?;
        let clauses_extracted: i64 = conn
            .query_row("SELECT COUNT(*) FROM clauses", [], |row| row.get(0))
            .map_err(|e| Error::Datastore(e.to_string()))?;
        drop(conn);

        let db_size = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        let matrix_rows = self.embedding_matrix.lock().matrix.nrows();

        Ok(StoreStats {
            total_documents,
            completed_documents,
            total_chunks,
            chunks_with_embeddings,
            clauses_extracted,
            embedding_dimension: self.embedding_dim,
            db_size_mb: db_size as f64 / (1024.0 * 1024.0),
            matrix_rows,
        })
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_document(row: &rusqlite::Row<'_>) -> Document {
        Document {
            id: row.get("id").unwrap_or(0),
            filename: row.get("filename").unwrap_or_default(),
            file_size: row.get("file_size").ok().flatten(),
            file_type: row.get("file_type").ok().flatten(),
            page_count: row.get("page_count").ok().flatten(),
            status: row.get("status").unwrap_or_default(),
            content_hash: row.get("content_hash").ok().flatten(),
            metadata: row
                .get::<_, Option<String>>("metadata_json")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok()),
            uploaded_at: row.get("uploaded_at").unwrap_or(0),
            processed_at: row.get("processed_at").ok().flatten(),
        }
    }

    fn row_to_chunk(row: &rusqlite::Row<'_>) -> Chunk {
        Chunk {
            id: row.get("id").unwrap_or(0),
            doc_id: row.get("doc_id").unwrap_or(0),
            chunk_index: row.get("chunk_index").unwrap_or(0),
            content: row.get("content").unwrap_or_default(),
            page_number: row.get("page_number").ok().flatten(),
            metadata: row
                .get::<_, Option<String>>("metadata_json")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok()),
            created_at: row.get("created_at").unwrap_or(0),
        }
    }

    fn row_to_clause(row: &rusqlite::Row<'_>) -> Clause {
        Clause {
            id: row.get("id").unwrap_or(0),
            doc_id: row.get("doc_id").unwrap_or(0),
            chunk_id: row.get("chunk_id").ok().flatten(),
            clause_type: row.get("clause_type").unwrap_or_default(),
            content: row.get("content").unwrap_or_default(),
            summary: row.get("summary").ok().flatten(),
            risk_level: row.get("risk_level").ok().flatten(),
            confidence: row.get("confidence").ok().flatten(),
            metadata: row
                .get::<_, Option<String>>("metadata_json")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok()),
            created_at: row.get("created_at").unwrap_or(0),
        }
    }

    fn row_to_entity(row: &rusqlite::Row<'_>) -> Entity {
        Entity {
            id: row.get("id").unwrap_or(0),
            doc_id: row.get("doc_id").unwrap_or(0),
            entity_type: row.get("entity_type").unwrap_or_default(),
            name: row.get("name").unwrap_or_default(),
            normalized_name: row.get("normalized_name").unwrap_or_default(),
            value: row.get("value").ok().flatten(),
            confidence: row.get("confidence").ok().flatten(),
            context: row.get("context").ok().flatten(),
            page_number: row.get("page_number").ok().flatten(),
            created_at: row.get("created_at").unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 768;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), DIM).unwrap();
        (store, dir)
    }

    fn basis_vector(axis: usize) -> Array1<f32> {
        let mut v = Array1::zeros(DIM);
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_add_and_get_document() {
        let (store, _dir) = test_store();

        let doc_id = store
            .add_document(
                "msa.pdf",
                AddDocumentOptions {
                    file_size: Some(1024),
                    file_type: Some("pdf".into()),
                    content_hash: Some("hash123".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let doc = store.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.filename, "msa.pdf");
        assert_eq!(doc.status, "pending");
        assert_eq!(doc.content_hash.as_deref(), Some("hash123"));
    }

    #[test]
    fn test_duplicate_content_hash() {
        let (store, _dir) = test_store();

        store
            .add_document(
                "first.pdf",
                AddDocumentOptions {
                    content_hash: Some("dup_hash".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let result = store.add_document(
            "second.pdf",
            AddDocumentOptions {
                content_hash: Some("dup_hash".into()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(Error::DuplicateContent(_))));
    }

    #[test]
    fn test_status_transitions_set_processed_at() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("a.pdf", Default::default()).unwrap();

        store
            .update_document_status(doc_id, "processing", None)
            .unwrap();
        let doc = store.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, "processing");
        assert!(doc.processed_at.is_none());

        store
            .update_document_status(doc_id, "completed", Some(12))
            .unwrap();
        let doc = store.get_document(doc_id).unwrap().unwrap();
        assert_eq!(doc.status, "completed");
        assert_eq!(doc.page_count, Some(12));
        assert!(doc.processed_at.is_some());
    }

    #[test]
    fn test_chunk_ordinal_unique_per_document() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("a.pdf", Default::default()).unwrap();

        store.add_chunk(doc_id, "first", 0, None, None).unwrap();
        assert!(store.add_chunk(doc_id, "dup ordinal", 0, None, None).is_err());

        // Same ordinal in another document is fine
        let other = store.add_document("b.pdf", Default::default()).unwrap();
        store.add_chunk(other, "first", 0, None, None).unwrap();
    }

    #[test]
    fn test_lexical_search_with_filter() {
        let (store, _dir) = test_store();
        let doc_a = store.add_document("nda.pdf", Default::default()).unwrap();
        let doc_b = store.add_document("msa.pdf", Default::default()).unwrap();

        store
            .add_chunk(doc_a, "The indemnification cap shall not exceed fees paid", 0, Some(3), None)
            .unwrap();
        store
            .add_chunk(doc_b, "Indemnification obligations survive termination", 0, None, None)
            .unwrap();
        store
            .add_chunk(doc_b, "Payment terms are net thirty days", 1, None, None)
            .unwrap();

        let all = store
            .lexical_search("indemnification", &CandidateFilter::default(), 10)
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].score >= all[1].score);
        assert!(all.iter().all(|h| h.score > 0.0));

        let scoped = store
            .lexical_search(
                "indemnification",
                &CandidateFilter::for_document(Some(doc_a)),
                10,
            )
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].doc_id, doc_a);
        assert_eq!(scoped[0].document_name, "nda.pdf");
        assert_eq!(scoped[0].page_number, Some(3));

        // Non-matching query: absent, not ranked last
        let none = store
            .lexical_search("zzzqqq", &CandidateFilter::default(), 10)
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_embedding_dimension_enforced() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("a.pdf", Default::default()).unwrap();
        let chunk_id = store.add_chunk(doc_id, "text", 0, None, None).unwrap();

        let wrong = Array1::<f32>::zeros(384);
        assert!(store.add_chunk_embedding(chunk_id, &wrong).is_err());

        let right = basis_vector(0);
        store.add_chunk_embedding(chunk_id, &right).unwrap();
        let stored = store.get_chunk_embedding(chunk_id).unwrap().unwrap();
        assert_eq!(stored.len(), DIM);
    }

    #[test]
    fn test_vector_search_threshold_and_filter() {
        let (store, _dir) = test_store();
        let doc_a = store.add_document("a.pdf", Default::default()).unwrap();
        let doc_b = store.add_document("b.pdf", Default::default()).unwrap();

        let c1 = store.add_chunk(doc_a, "about termination", 0, None, None).unwrap();
        let c2 = store.add_chunk(doc_b, "about payment", 0, None, None).unwrap();

        store.add_chunk_embedding(c1, &basis_vector(0)).unwrap();
        store.add_chunk_embedding(c2, &basis_vector(1)).unwrap();

        // Query aligned with c1, slightly correlated with c2
        let mut query = Array1::zeros(DIM);
        query[0] = 1.0;
        query[1] = 0.2;

        let hits = store
            .vector_search(&query, &CandidateFilter::default(), 0.0, 10)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, c1);
        assert!(hits[0].similarity > hits[1].similarity);

        // Threshold excludes the weak match entirely
        let hits = store
            .vector_search(&query, &CandidateFilter::default(), 0.9, 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, c1);

        // Excluding doc_a leaves only c2
        let filter = CandidateFilter {
            exclude_document_id: Some(doc_a),
            ..Default::default()
        };
        let hits = store.vector_search(&query, &filter, 0.0, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, c2);
    }

    #[test]
    fn test_vector_search_deterministic() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("a.pdf", Default::default()).unwrap();
        for i in 0..5 {
            let cid = store
                .add_chunk(doc_id, &format!("chunk {}", i), i, None, None)
                .unwrap();
            store.add_chunk_embedding(cid, &basis_vector(i as usize)).unwrap();
        }

        let mut query = Array1::zeros(DIM);
        for i in 0..5 {
            query[i] = 1.0; // equidistant from all five
        }

        let first = store
            .vector_search(&query, &CandidateFilter::default(), 0.0, 5)
            .unwrap();
        let second = store
            .vector_search(&query, &CandidateFilter::default(), 0.0, 5)
            .unwrap();
        let ids: Vec<i64> = first.iter().map(|h| h.chunk_id).collect();
        let ids2: Vec<i64> = second.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, ids2);
    }

    #[test]
    fn test_reembedding_replaces_matrix_row() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("a.pdf", Default::default()).unwrap();
        let chunk_id = store.add_chunk(doc_id, "renewal terms", 0, None, None).unwrap();

        store.add_chunk_embedding(chunk_id, &basis_vector(0)).unwrap();
        // Searching materializes the in-memory matrix before the re-embed
        store
            .vector_search(&basis_vector(0), &CandidateFilter::default(), 0.0, 10)
            .unwrap();

        // Regenerate the embedding, e.g. after an embedding-model swap
        store.add_chunk_embedding(chunk_id, &basis_vector(1)).unwrap();

        let hits = store
            .vector_search(&basis_vector(1), &CandidateFilter::default(), 0.0, 10)
            .unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids, vec![chunk_id]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-3);

        // The superseded vector no longer matches anything
        let stale = store
            .vector_search(&basis_vector(0), &CandidateFilter::default(), 0.5, 10)
            .unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn test_delete_document_cascades() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("gone.pdf", Default::default()).unwrap();
        let chunk_id = store.add_chunk(doc_id, "chunk text", 0, None, None).unwrap();
        store.add_chunk_embedding(chunk_id, &basis_vector(0)).unwrap();
        store
            .add_clause(&NewClause {
                doc_id,
                chunk_id: Some(chunk_id),
                clause_type: "termination".into(),
                content: "may terminate".into(),
                summary: None,
                risk_level: Some("high".into()),
                confidence: Some(0.8),
                metadata: None,
            })
            .unwrap();

        store.delete_document(doc_id).unwrap();

        assert!(store.get_document(doc_id).unwrap().is_none());
        assert_eq!(store.count_chunks().unwrap(), 0);
        assert!(store.get_chunk_embedding(chunk_id).unwrap().is_none());
        assert!(store.clauses_for_document(doc_id).unwrap().is_empty());
        assert!(store
            .vector_search(&basis_vector(0), &CandidateFilter::default(), 0.0, 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_clause_search_filters() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("a.pdf", Default::default()).unwrap();

        for (ct, rl, content) in [
            ("termination", "high", "either party may terminate for convenience"),
            ("indemnification", "critical", "uncapped indemnification obligations"),
            ("payment_terms", "low", "net 30 payment terms"),
        ] {
            store
                .add_clause(&NewClause {
                    doc_id,
                    chunk_id: None,
                    clause_type: ct.into(),
                    content: content.into(),
                    summary: None,
                    risk_level: Some(rl.into()),
                    confidence: Some(0.8),
                    metadata: None,
                })
                .unwrap();
        }

        let by_type = store
            .search_clauses(&ClauseFilter {
                clause_type: Some("termination".into()),
                limit: 20,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_type.len(), 1);

        let by_risk = store
            .search_clauses(&ClauseFilter {
                risk_level: Some("critical".into()),
                limit: 20,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_risk.len(), 1);
        assert_eq!(by_risk[0].clause_type, "indemnification");

        let by_content = store
            .search_clauses(&ClauseFilter {
                content_query: Some("NET 30".into()),
                limit: 20,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_content.len(), 1);

        let type_counts = store.clause_type_counts().unwrap();
        assert_eq!(type_counts.len(), 3);
    }

    #[test]
    fn test_entities_and_relationships() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("spa.pdf", Default::default()).unwrap();

        let acme = store
            .add_entity(&NewEntity {
                doc_id,
                entity_type: "party".into(),
                name: "Acme Corp.".into(),
                normalized_name: "ACME".into(),
                value: None,
                confidence: Some(0.8),
                context: None,
                page_number: Some(1),
            })
            .unwrap();
        let globex = store
            .add_entity(&NewEntity {
                doc_id,
                entity_type: "party".into(),
                name: "Globex LLC".into(),
                normalized_name: "GLOBEX".into(),
                value: None,
                confidence: Some(0.8),
                context: None,
                page_number: Some(1),
            })
            .unwrap();
        store
            .add_relationship(doc_id, acme, globex, "party_to_contract", None, Some(0.7))
            .unwrap();

        assert_eq!(store.entities_for_document(doc_id).unwrap().len(), 2);
        assert_eq!(store.relationships_for_document(doc_id).unwrap().len(), 1);

        // Deleting entities cascades to relationships
        store.delete_entities_for_document(doc_id).unwrap();
        assert!(store.relationships_for_document(doc_id).unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let (store, _dir) = test_store();
        let doc_id = store.add_document("a.pdf", Default::default()).unwrap();
        let chunk_id = store.add_chunk(doc_id, "text", 0, None, None).unwrap();
        store.add_chunk_embedding(chunk_id, &basis_vector(0)).unwrap();
        store.update_document_status(doc_id, "completed", Some(1)).unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.completed_documents, 1);
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.chunks_with_embeddings, 1);
        assert_eq!(stats.embedding_dimension, DIM);
    }
}

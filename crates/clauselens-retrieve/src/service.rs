//! The retrieval service: mode dispatch, oracle orchestration, fusion,
//! and keyword-only degradation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use clauselens_core::{Error, Result};
use clauselens_embed::EmbeddingProvider;
use clauselens_store::{CandidateFilter, LexicalHit, SemanticHit};

use crate::fusion::{fuse, OVERFETCH_FACTOR};
use crate::oracles::RetrievalBackend;
use crate::types::{ScoredCandidate, SearchMode, SearchOutcome, SearchQuery};

/// Orchestrates the similarity and lexical oracles behind one `search`
/// entry point.
pub struct RetrievalService {
    backend: Arc<dyn RetrievalBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalService {
    pub fn new(backend: Arc<dyn RetrievalBackend>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { backend, embedder }
    }

    /// Run a validated search in the requested mode.
    ///
    /// Hybrid and semantic requests degrade to keyword-only when no query
    /// embedding can be produced; the outcome's `mode_used` records what
    /// actually ran.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchOutcome> {
        query.validate()?;

        match query.mode {
            SearchMode::Hybrid => self.search_hybrid(query).await,
            SearchMode::Semantic => self.search_semantic(query).await,
            SearchMode::Keyword => self.search_keyword(query).await,
        }
    }

    async fn search_hybrid(&self, query: &SearchQuery) -> Result<SearchOutcome> {
        let filter = CandidateFilter::for_document(query.document_id);
        let overfetch = query.limit * OVERFETCH_FACTOR;

        // The lexical oracle needs no embedding, so it runs while the
        // embedding call is in flight. The similarity oracle must wait for
        // the query vector.
        let (embedding, lexical) = tokio::join!(
            self.embedder.embed(&query.query),
            self.backend.lexical_hits(&query.query, &filter, overfetch),
        );
        let lexical = lexical?;

        let Some(embedding) = embedding else {
            info!("No query embedding available, degrading to keyword-only search");
            let results = lexical_candidates(lexical, query.limit);
            return Ok(SearchOutcome {
                results,
                mode_used: SearchMode::Keyword,
            });
        };

        let semantic = self
            .backend
            .semantic_hits(&embedding, &filter, query.min_similarity, overfetch)
            .await?;

        debug!(
            "Fusing {} semantic and {} lexical candidates",
            semantic.len(),
            lexical.len()
        );
        let results = fuse(
            semantic,
            lexical,
            query.semantic_weight,
            query.keyword_weight,
            query.limit,
        );
        Ok(SearchOutcome {
            results,
            mode_used: SearchMode::Hybrid,
        })
    }

    async fn search_semantic(&self, query: &SearchQuery) -> Result<SearchOutcome> {
        let filter = CandidateFilter::for_document(query.document_id);

        let Some(embedding) = self.embedder.embed(&query.query).await else {
            info!("No query embedding available, degrading to keyword-only search");
            let lexical = self
                .backend
                .lexical_hits(&query.query, &filter, query.limit)
                .await?;
            let results = lexical_candidates(lexical, query.limit);
            return Ok(SearchOutcome {
                results,
                mode_used: SearchMode::Keyword,
            });
        };

        let semantic = self
            .backend
            .semantic_hits(&embedding, &filter, query.min_similarity, query.limit)
            .await?;
        let results = semantic.into_iter().map(semantic_candidate).collect();
        Ok(SearchOutcome {
            results,
            mode_used: SearchMode::Semantic,
        })
    }

    async fn search_keyword(&self, query: &SearchQuery) -> Result<SearchOutcome> {
        let filter = CandidateFilter::for_document(query.document_id);
        let lexical = self
            .backend
            .lexical_hits(&query.query, &filter, query.limit)
            .await?;
        Ok(SearchOutcome {
            results: lexical_candidates(lexical, query.limit),
            mode_used: SearchMode::Keyword,
        })
    }

    /// Chunks most similar to an existing chunk, by embedding proximity.
    ///
    /// The source chunk itself is always excluded; its document can be
    /// excluded too for cross-document discovery. No similarity threshold
    /// applies here.
    pub async fn find_similar(
        &self,
        chunk_id: i64,
        limit: usize,
        exclude_same_document: bool,
    ) -> Result<Vec<ScoredCandidate>> {
        let doc_id = self
            .backend
            .chunk_document(chunk_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chunk {}", chunk_id)))?;

        let embedding = self
            .backend
            .chunk_embedding(chunk_id)
            .await?
            .ok_or(Error::ChunkNotEmbedded(chunk_id))?;

        let filter = CandidateFilter {
            document_id: None,
            exclude_document_id: exclude_same_document.then_some(doc_id),
            exclude_chunk_id: Some(chunk_id),
        };

        if !self.embedder.is_available() {
            warn!("Similar-chunk lookup with embedder offline; using stored vectors only");
        }

        let hits = self
            .backend
            .semantic_hits(&embedding, &filter, -1.0, limit)
            .await?;
        Ok(hits.into_iter().map(semantic_candidate).collect())
    }
}

fn semantic_candidate(hit: SemanticHit) -> ScoredCandidate {
    ScoredCandidate {
        chunk_id: hit.chunk_id,
        document_id: hit.doc_id,
        document_name: hit.document_name,
        content: hit.content,
        page_number: hit.page_number,
        semantic_similarity: Some(hit.similarity),
        keyword_score: None,
        combined_score: hit.similarity as f64,
    }
}

fn lexical_candidates(lexical: Vec<LexicalHit>, limit: usize) -> Vec<ScoredCandidate> {
    lexical
        .into_iter()
        .take(limit)
        .map(|hit| ScoredCandidate {
            chunk_id: hit.chunk_id,
            document_id: hit.doc_id,
            document_name: hit.document_name,
            content: hit.content,
            page_number: hit.page_number,
            semantic_similarity: None,
            keyword_score: Some(hit.score),
            combined_score: hit.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ndarray::{array, Array1};
    use parking_lot::Mutex;

    struct FakeBackend {
        semantic: Vec<SemanticHit>,
        lexical: Vec<LexicalHit>,
        chunk_doc: Option<i64>,
        chunk_embedding: Option<Array1<f32>>,
        requested_top_k: Mutex<Vec<usize>>,
        last_filter: Mutex<Option<CandidateFilter>>,
    }

    impl FakeBackend {
        fn new(semantic: Vec<SemanticHit>, lexical: Vec<LexicalHit>) -> Self {
            Self {
                semantic,
                lexical,
                chunk_doc: None,
                chunk_embedding: None,
                requested_top_k: Mutex::new(Vec::new()),
                last_filter: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl RetrievalBackend for FakeBackend {
        async fn semantic_hits(
            &self,
            _embedding: &Array1<f32>,
            filter: &CandidateFilter,
            min_similarity: f32,
            top_k: usize,
        ) -> Result<Vec<SemanticHit>> {
            self.requested_top_k.lock().push(top_k);
            *self.last_filter.lock() = Some(*filter);
            Ok(self
                .semantic
                .iter()
                .filter(|h| h.similarity >= min_similarity)
                .take(top_k)
                .cloned()
                .collect())
        }

        async fn lexical_hits(
            &self,
            _query: &str,
            _filter: &CandidateFilter,
            top_k: usize,
        ) -> Result<Vec<LexicalHit>> {
            self.requested_top_k.lock().push(top_k);
            Ok(self.lexical.iter().take(top_k).cloned().collect())
        }

        async fn chunk_document(&self, _chunk_id: i64) -> Result<Option<i64>> {
            Ok(self.chunk_doc)
        }

        async fn chunk_embedding(&self, _chunk_id: i64) -> Result<Option<Array1<f32>>> {
            Ok(self.chunk_embedding.clone())
        }
    }

    struct FixedEmbedder(Option<Array1<f32>>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Option<Array1<f32>> {
            self.0.clone()
        }

        fn dimension(&self) -> usize {
            3
        }

        fn is_available(&self) -> bool {
            self.0.is_some()
        }
    }

    fn semantic_hit(chunk_id: i64, similarity: f32) -> SemanticHit {
        SemanticHit {
            chunk_id,
            doc_id: 1,
            document_name: "contract.pdf".into(),
            content: format!("chunk {}", chunk_id),
            page_number: None,
            similarity,
        }
    }

    fn lexical_hit(chunk_id: i64, score: f64) -> LexicalHit {
        LexicalHit {
            chunk_id,
            doc_id: 1,
            document_name: "contract.pdf".into(),
            content: format!("chunk {}", chunk_id),
            page_number: None,
            score,
        }
    }

    fn service(
        backend: FakeBackend,
        embedding: Option<Array1<f32>>,
    ) -> (RetrievalService, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let svc = RetrievalService::new(backend.clone(), Arc::new(FixedEmbedder(embedding)));
        (svc, backend)
    }

    #[tokio::test]
    async fn test_hybrid_fuses_and_reports_mode() {
        let backend = FakeBackend::new(
            vec![semantic_hit(1, 0.9), semantic_hit(2, 0.8)],
            vec![lexical_hit(2, 6.0), lexical_hit(1, 3.0)],
        );
        let (svc, _) = service(backend, Some(array![1.0, 0.0, 0.0]));

        let outcome = svc.search(&SearchQuery::new("termination rights")).await.unwrap();
        assert_eq!(outcome.mode_used, SearchMode::Hybrid);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results[0].semantic_similarity.is_some());
        assert!(outcome.results[0].keyword_score.is_some());
    }

    #[tokio::test]
    async fn test_hybrid_overfetches_both_oracles() {
        let backend = FakeBackend::new(
            vec![semantic_hit(1, 0.9)],
            vec![lexical_hit(1, 3.0)],
        );
        let (svc, backend) = service(backend, Some(array![1.0, 0.0, 0.0]));

        let mut query = SearchQuery::new("termination rights");
        query.limit = 10;
        svc.search(&query).await.unwrap();

        let requested = backend.requested_top_k.lock().clone();
        assert_eq!(requested, vec![30, 30]);
    }

    #[tokio::test]
    async fn test_hybrid_falls_back_to_keyword_without_embedding() {
        let backend = FakeBackend::new(
            vec![semantic_hit(1, 0.9)],
            vec![lexical_hit(5, 7.0), lexical_hit(6, 2.0)],
        );
        let (svc, _) = service(backend, None);

        let outcome = svc.search(&SearchQuery::new("limitation of liability")).await.unwrap();
        assert_eq!(outcome.mode_used, SearchMode::Keyword);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].chunk_id, 5);
        assert_eq!(outcome.results[0].combined_score, 7.0);
        assert!(outcome.results[0].semantic_similarity.is_none());
    }

    #[tokio::test]
    async fn test_hybrid_fallback_truncates_to_limit() {
        let lexical = (1..=9).map(|i| lexical_hit(i, 10.0 - i as f64)).collect();
        let backend = FakeBackend::new(Vec::new(), lexical);
        let (svc, _) = service(backend, None);

        let mut query = SearchQuery::new("payment terms");
        query.limit = 3;
        let outcome = svc.search(&query).await.unwrap();
        assert_eq!(outcome.results.len(), 3);
    }

    #[tokio::test]
    async fn test_semantic_mode() {
        let backend = FakeBackend::new(
            vec![semantic_hit(1, 0.9), semantic_hit(2, 0.2)],
            vec![lexical_hit(3, 5.0)],
        );
        let (svc, _) = service(backend, Some(array![1.0, 0.0, 0.0]));

        let mut query = SearchQuery::new("governing law");
        query.mode = SearchMode::Semantic;
        let outcome = svc.search(&query).await.unwrap();

        assert_eq!(outcome.mode_used, SearchMode::Semantic);
        // min_similarity 0.3 excludes the 0.2 hit entirely
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].chunk_id, 1);
        assert!((outcome.results[0].combined_score - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_semantic_mode_falls_back_without_embedding() {
        let backend = FakeBackend::new(Vec::new(), vec![lexical_hit(4, 2.0)]);
        let (svc, _) = service(backend, None);

        let mut query = SearchQuery::new("governing law");
        query.mode = SearchMode::Semantic;
        let outcome = svc.search(&query).await.unwrap();
        assert_eq!(outcome.mode_used, SearchMode::Keyword);
        assert_eq!(outcome.results[0].chunk_id, 4);
    }

    #[tokio::test]
    async fn test_keyword_mode_never_embeds() {
        let backend = FakeBackend::new(vec![semantic_hit(1, 0.9)], vec![lexical_hit(2, 4.0)]);
        let (svc, backend) = service(backend, Some(array![1.0, 0.0, 0.0]));

        let mut query = SearchQuery::new("force majeure");
        query.mode = SearchMode::Keyword;
        let outcome = svc.search(&query).await.unwrap();

        assert_eq!(outcome.mode_used, SearchMode::Keyword);
        assert_eq!(outcome.results[0].chunk_id, 2);
        // Only the lexical oracle was consulted, at the requested limit
        assert_eq!(backend.requested_top_k.lock().clone(), vec![10]);
    }

    #[tokio::test]
    async fn test_invalid_query_rejected_before_oracles() {
        let backend = FakeBackend::new(Vec::new(), Vec::new());
        let (svc, backend) = service(backend, Some(array![1.0, 0.0, 0.0]));

        let err = svc.search(&SearchQuery::new("ab")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
        assert!(backend.requested_top_k.lock().is_empty());
    }

    #[tokio::test]
    async fn test_find_similar_unknown_chunk() {
        let backend = FakeBackend::new(Vec::new(), Vec::new());
        let (svc, _) = service(backend, None);

        let err = svc.find_similar(42, 5, false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_find_similar_unembedded_chunk() {
        let mut backend = FakeBackend::new(Vec::new(), Vec::new());
        backend.chunk_doc = Some(7);
        let (svc, _) = service(backend, None);

        let err = svc.find_similar(42, 5, false).await.unwrap_err();
        assert!(matches!(err, Error::ChunkNotEmbedded(42)));
    }

    #[tokio::test]
    async fn test_find_similar_filters() {
        let mut backend = FakeBackend::new(vec![semantic_hit(9, 0.5)], Vec::new());
        backend.chunk_doc = Some(7);
        backend.chunk_embedding = Some(array![1.0, 0.0, 0.0]);
        let (svc, backend) = service(backend, None);

        let results = svc.find_similar(42, 5, true).await.unwrap();
        assert_eq!(results.len(), 1);

        let filter = (*backend.last_filter.lock()).unwrap();
        assert_eq!(filter.exclude_chunk_id, Some(42));
        assert_eq!(filter.exclude_document_id, Some(7));

        svc.find_similar(42, 5, false).await.unwrap();
        let filter = (*backend.last_filter.lock()).unwrap();
        assert_eq!(filter.exclude_document_id, None);
    }
}

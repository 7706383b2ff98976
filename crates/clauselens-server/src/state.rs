//! Shared application state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use clauselens_core::AppConfig;
use clauselens_embed::{EmbeddingProvider, OllamaEmbedder};
use clauselens_extract::{ClauseExtractor, EntityExtractor, LlmClient};
use clauselens_ingest::OcrPipeline;
use clauselens_retrieve::{RetrievalService, StoreBackend};
use clauselens_store::SqliteStore;

/// Document processing job status, tracked per upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: String,
    pub filename: String,
    pub status: ProcessingStatus,
    pub document_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub queued_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// A request to process an uploaded document.
pub struct ProcessingRequest {
    pub job_id: String,
    pub document_id: i64,
    pub file_path: String,
    pub filename: String,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub retrieval: RetrievalService,
    pub ocr: OcrPipeline,
    pub clause_extractor: ClauseExtractor,
    pub entity_extractor: EntityExtractor,
    pub processing_jobs: RwLock<HashMap<String, ProcessingJob>>,
    pub processing_tx: mpsc::UnboundedSender<ProcessingRequest>,
    processing_rx: Mutex<Option<mpsc::UnboundedReceiver<ProcessingRequest>>>,
}

impl AppState {
    pub fn new(config: AppConfig, store: SqliteStore) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(store);

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::new(
            &config.ollama_url,
            &config.embedding_model,
            config.embedding_dim,
            Duration::from_secs(config.embed_timeout_secs),
        ));

        let retrieval = RetrievalService::new(
            Arc::new(StoreBackend::new(store.clone())),
            embedder.clone(),
        );

        let ocr = OcrPipeline::from_config(&config.ocr, &config.ollama_url);

        let llm_timeout = Duration::from_secs(120);
        let clause_extractor = ClauseExtractor::new(
            LlmClient::new(&config.ollama_url, &config.llm_model, llm_timeout),
            &config.chunking,
        );
        let entity_extractor = EntityExtractor::new(
            LlmClient::new(&config.ollama_url, &config.llm_model, llm_timeout),
            &config.chunking,
        );

        Self {
            config,
            store,
            embedder,
            retrieval,
            ocr,
            clause_extractor,
            entity_extractor,
            processing_jobs: RwLock::new(HashMap::new()),
            processing_tx: tx,
            processing_rx: Mutex::new(Some(rx)),
        }
    }

    /// Take the processing receiver (can only be called once, by the worker).
    pub fn take_processing_rx(&self) -> Option<mpsc::UnboundedReceiver<ProcessingRequest>> {
        self.processing_rx.lock().take()
    }
}

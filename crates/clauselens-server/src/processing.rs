//! Background document processing: extract, clean, chunk, embed.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use clauselens_core::{Error, Result};
use clauselens_ingest::quality::clean_text;
use clauselens_ingest::ContractChunker;

use crate::state::{AppState, ProcessingRequest, ProcessingStatus};

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Spawn the single processing worker. Jobs run one at a time so the
/// embedding model and OCR sidecar are never hammered by parallel uploads.
pub fn start_processing_worker(state: Arc<AppState>) {
    tokio::spawn(async move {
        let Some(mut rx) = state.take_processing_rx() else {
            warn!("Processing worker already started");
            return;
        };

        info!("Processing worker started");
        while let Some(req) = rx.recv().await {
            set_job_status(&state, &req.job_id, ProcessingStatus::Processing, None);
            let _ = state
                .store
                .update_document_status(req.document_id, "processing", None);

            match process_document(&state, &req).await {
                Ok(chunk_count) => {
                    info!(
                        "Processed {} into {} chunks (doc {})",
                        req.filename, chunk_count, req.document_id
                    );
                    set_job_status(&state, &req.job_id, ProcessingStatus::Completed, None);
                }
                Err(e) => {
                    error!("Processing {} failed: {}", req.filename, e);
                    let _ = state
                        .store
                        .update_document_status(req.document_id, "failed", None);
                    set_job_status(
                        &state,
                        &req.job_id,
                        ProcessingStatus::Failed,
                        Some(e.to_string()),
                    );
                }
            }
        }
    });
}

fn set_job_status(
    state: &AppState,
    job_id: &str,
    status: ProcessingStatus,
    error: Option<String>,
) {
    let mut jobs = state.processing_jobs.write();
    if let Some(job) = jobs.get_mut(job_id) {
        match status {
            ProcessingStatus::Processing => job.started_at = Some(now_millis()),
            ProcessingStatus::Completed | ProcessingStatus::Failed => {
                job.completed_at = Some(now_millis())
            }
            ProcessingStatus::Queued => {}
        }
        job.status = status;
        job.error = error;
    }
}

async fn process_document(state: &AppState, req: &ProcessingRequest) -> Result<usize> {
    let path = Path::new(&req.file_path);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    // Plain-text formats skip the OCR ladder entirely
    let (text, page_count) = match extension.as_deref() {
        Some("txt") | Some("md") => {
            let raw = tokio::fs::read_to_string(path).await?;
            (clean_text(&raw), None)
        }
        _ => {
            let extracted = state.ocr.extract(path).await?;
            (extracted.text, extracted.page_count)
        }
    };

    let chunker = ContractChunker::new(
        state.config.chunking.chunk_size,
        state.config.chunking.chunk_overlap,
    );
    let drafts = chunker.chunk(&text);
    if drafts.is_empty() {
        return Err(Error::Extraction(format!(
            "{} produced no indexable text",
            req.filename
        )));
    }

    let mut embedded = 0usize;
    for draft in &drafts {
        let metadata = serde_json::json!({
            "char_count": draft.char_count,
            "word_count": draft.word_count,
        });
        let chunk_id = state.store.add_chunk(
            req.document_id,
            &draft.content,
            draft.ordinal,
            draft.page_number,
            Some(&metadata),
        )?;

        // Missing embeddings leave the chunk keyword-searchable only
        if let Some(embedding) = state.embedder.embed(&draft.content).await {
            state.store.add_chunk_embedding(chunk_id, &embedding)?;
            embedded += 1;
        }
    }
    if embedded < drafts.len() {
        warn!(
            "{}: embedded {}/{} chunks, rest are keyword-only",
            req.filename,
            embedded,
            drafts.len()
        );
    }

    state
        .store
        .update_document_status(req.document_id, "completed", page_count)?;
    Ok(drafts.len())
}

//! Document routes — upload, listing, deletion, job status.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{info, warn};
use uuid::Uuid;

use crate::routes::error_response;
use crate::state::{AppState, ProcessingJob, ProcessingRequest, ProcessingStatus};
use clauselens_ingest::content_hash;
use clauselens_store::AddDocumentOptions;

const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "docx", "txt", "md"];

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/documents/upload", post(upload_document))
        .route("/documents", get(list_documents))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/documents/{id}/chunks", get(get_document_chunks))
        .route("/documents/jobs/{job_id}", get(get_job))
}

async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut filename = None;
    let mut bytes = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            filename = field.file_name().map(String::from);
            bytes = field.bytes().await.ok();
        }
    }

    let (Some(filename), Some(bytes)) = (filename, bytes) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "missing file field" })),
        );
    };

    let extension = filename
        .rsplit('.')
        .next()
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("unsupported file type .{}", extension)
            })),
        );
    }
    if bytes.len() > state.config.max_file_size {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(serde_json::json!({ "error": "file exceeds size limit" })),
        );
    }

    let hash = content_hash(&bytes);
    match state.store.find_document_by_hash(&hash) {
        Ok(Some(existing)) => {
            return (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": "document already uploaded",
                    "document_id": existing.id,
                    "content_hash": hash,
                })),
            );
        }
        Ok(None) => {}
        Err(e) => return error_response(e),
    }

    let doc_id = match state.store.add_document(
        &filename,
        AddDocumentOptions {
            file_size: Some(bytes.len() as i64),
            file_type: Some(extension.clone()),
            content_hash: Some(hash.clone()),
            ..Default::default()
        },
    ) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    // Persist the original file for the processing worker
    let stored_name = format!("{}_{}", doc_id, filename);
    let file_path = state.config.data_paths.uploads.join(&stored_name);
    if let Err(e) = tokio::fs::write(&file_path, &bytes).await {
        warn!("Failed to store upload: {}", e);
        let _ = state.store.delete_document(doc_id);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        );
    }

    let job_id = Uuid::new_v4().to_string();
    let job = ProcessingJob {
        id: job_id.clone(),
        filename: filename.clone(),
        status: ProcessingStatus::Queued,
        document_id: doc_id,
        error: None,
        queued_at: chrono::Utc::now().timestamp_millis(),
        started_at: None,
        completed_at: None,
    };
    state.processing_jobs.write().insert(job_id.clone(), job);

    let request = ProcessingRequest {
        job_id: job_id.clone(),
        document_id: doc_id,
        file_path: file_path.to_string_lossy().into_owned(),
        filename: filename.clone(),
    };
    if state.processing_tx.send(request).is_err() {
        warn!("Processing queue closed, document {} stays pending", doc_id);
    }

    info!("Queued {} for processing as document {}", filename, doc_id);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "document_id": doc_id,
            "job_id": job_id,
            "status": "queued",
            "content_hash": hash,
        })),
    )
}

async fn list_documents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.list_documents() {
        Ok(docs) => {
            let total = docs.len();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "documents": docs, "total": total })),
            )
        }
        Err(e) => error_response(e),
    }
}

async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_document(id) {
        Ok(Some(doc)) => (StatusCode::OK, Json(serde_json::json!(doc))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("document {} not found", id) })),
        ),
        Err(e) => error_response(e),
    }
}

async fn get_document_chunks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_chunks_for_document(id) {
        Ok(chunks) => (
            StatusCode::OK,
            Json(serde_json::json!({ "document_id": id, "chunks": chunks })),
        ),
        Err(e) => error_response(e),
    }
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.delete_document(id) {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({ "deleted": true, "document_id": id })),
        ),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("document {} not found", id) })),
        ),
        Err(e) => error_response(e),
    }
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    match state.processing_jobs.read().get(&job_id) {
        Some(job) => (StatusCode::OK, Json(serde_json::json!(job))),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("job {} not found", job_id) })),
        ),
    }
}

//! Health and status routes.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.store.get_stats().ok();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "clauselens",
        "embedder_available": state.embedder.is_available(),
        "documents": stats.as_ref().map(|s| s.total_documents).unwrap_or(0),
        "chunks": stats.as_ref().map(|s| s.total_chunks).unwrap_or(0),
    }))
}

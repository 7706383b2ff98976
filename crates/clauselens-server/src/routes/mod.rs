//! HTTP route handlers.

pub mod analysis;
pub mod documents;
pub mod health;
pub mod search;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use clauselens_core::Error;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::routes())
        .merge(documents::routes())
        .merge(search::routes())
        .merge(analysis::routes())
}

/// Map a domain error to an HTTP response.
pub fn error_response(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        Error::InvalidQuery(_) | Error::InvalidSearchMode(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::DuplicateContent(_) | Error::ChunkNotEmbedded(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

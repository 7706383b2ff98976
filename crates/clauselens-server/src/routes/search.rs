//! Search routes — hybrid/semantic/keyword search, similar chunks, stats.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::routes::error_response;
use crate::state::AppState;
use clauselens_retrieve::{SearchMode, SearchQuery};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", get(search_get).post(search_post))
        .route("/search/similar/{chunk_id}", get(similar_chunks))
        .route("/search/stats", get(get_stats))
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(alias = "q")]
    query: String,
    mode: Option<String>,
    limit: Option<usize>,
    semantic_weight: Option<f64>,
    keyword_weight: Option<f64>,
    min_similarity: Option<f32>,
    document_id: Option<i64>,
}

/// Query-string form of search, for quick manual use.
async fn search_get(
    State(state): State<Arc<AppState>>,
    Query(req): Query<SearchRequest>,
) -> impl IntoResponse {
    run_search(state, req).await
}

async fn search_post(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse {
    run_search(state, req).await
}

async fn run_search(
    state: Arc<AppState>,
    req: SearchRequest,
) -> (StatusCode, Json<serde_json::Value>) {
    let defaults = &state.config.retrieval;

    let mode = match req.mode.as_deref() {
        Some(raw) => match raw.parse::<SearchMode>() {
            Ok(mode) => mode,
            Err(e) => return error_response(e),
        },
        None => SearchMode::Hybrid,
    };

    let query = SearchQuery {
        query: req.query,
        mode,
        limit: req.limit.unwrap_or(defaults.default_limit),
        semantic_weight: req.semantic_weight.unwrap_or(defaults.semantic_weight),
        keyword_weight: req.keyword_weight.unwrap_or(defaults.keyword_weight),
        min_similarity: req.min_similarity.unwrap_or(defaults.min_similarity),
        document_id: req.document_id,
    };

    match state.retrieval.search(&query).await {
        Ok(outcome) => {
            let total = outcome.results.len();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "query": query.query,
                    "mode_requested": query.mode,
                    "mode_used": outcome.mode_used,
                    "results": outcome.results,
                    "total": total,
                })),
            )
        }
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct SimilarParams {
    limit: Option<usize>,
    #[serde(default)]
    exclude_same_document: bool,
}

async fn similar_chunks(
    State(state): State<Arc<AppState>>,
    Path(chunk_id): Path<i64>,
    Query(params): Query<SimilarParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .unwrap_or(state.config.retrieval.default_limit)
        .clamp(1, state.config.retrieval.max_limit);

    match state
        .retrieval
        .find_similar(chunk_id, limit, params.exclude_same_document)
        .await
    {
        Ok(results) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "chunk_id": chunk_id,
                "results": results,
            })),
        ),
        Err(e) => error_response(e),
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = match state.store.get_stats() {
        Ok(stats) => stats,
        Err(e) => return error_response(e),
    };
    let clause_types = match state.store.clause_type_counts() {
        Ok(counts) => counts,
        Err(e) => return error_response(e),
    };
    let risk_levels = match state.store.risk_level_counts() {
        Ok(counts) => counts,
        Err(e) => return error_response(e),
    };

    let clause_types: HashMap<String, i64> = clause_types.into_iter().collect();
    let risk_levels: HashMap<String, i64> = risk_levels.into_iter().collect();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "index": stats,
            "clause_types": clause_types,
            "risk_levels": risk_levels,
        })),
    )
}

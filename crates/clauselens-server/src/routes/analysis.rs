//! Analysis routes — clause extraction, risk summaries, entity graph.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::info;

use crate::routes::error_response;
use crate::state::AppState;
use clauselens_core::Error;
use clauselens_extract::entities::resolve_relationships;
use clauselens_extract::clauses::overall_risk;
use clauselens_store::{ClauseFilter, NewClause, NewEntity};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/analysis/documents/{id}/clauses",
            post(extract_clauses).get(get_clauses),
        )
        .route("/analysis/clauses", get(search_clauses))
        .route("/analysis/documents/{id}/risk-summary", get(risk_summary))
        .route("/analysis/documents/{id}/entities", post(extract_entities))
        .route("/analysis/documents/{id}/graph", get(get_graph))
}

/// Concatenated chunk text for whole-document analysis.
fn document_text(state: &AppState, doc_id: i64) -> Result<String, Error> {
    if state.store.get_document(doc_id)?.is_none() {
        return Err(Error::NotFound(format!("document {}", doc_id)));
    }
    let chunks = state.store.get_chunks_for_document(doc_id)?;
    let text = chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.trim().is_empty() {
        return Err(Error::Extraction(format!(
            "document {} has no extracted text",
            doc_id
        )));
    }
    Ok(text)
}

// ---------------------------------------------------------------
// Clauses
// ---------------------------------------------------------------

async fn extract_clauses(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let text = match document_text(&state, id) {
        Ok(text) => text,
        Err(e) => return error_response(e),
    };

    let parsed = match state.clause_extractor.extract(&text).await {
        Ok(parsed) => parsed,
        Err(e) => return error_response(e),
    };

    // Re-extraction replaces previous results wholesale
    if let Err(e) = state.store.delete_clauses_for_document(id) {
        return error_response(e);
    }
    for clause in &parsed {
        let result = state.store.add_clause(&NewClause {
            doc_id: id,
            chunk_id: None,
            clause_type: clause.clause_type.clone(),
            content: clause.content.clone(),
            summary: clause.summary.clone(),
            risk_level: Some(clause.risk_level.clone()),
            confidence: Some(clause.confidence),
            metadata: Some(serde_json::json!({ "risk_factors": clause.risk_factors })),
        });
        if let Err(e) = result {
            return error_response(e);
        }
    }

    info!("Extracted {} clauses from document {}", parsed.len(), id);
    match state.store.clauses_for_document(id) {
        Ok(clauses) => (
            StatusCode::OK,
            Json(serde_json::json!({ "document_id": id, "clauses": clauses })),
        ),
        Err(e) => error_response(e),
    }
}

async fn get_clauses(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.clauses_for_document(id) {
        Ok(clauses) => (
            StatusCode::OK,
            Json(serde_json::json!({ "document_id": id, "clauses": clauses })),
        ),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct ClauseSearchParams {
    clause_type: Option<String>,
    risk_level: Option<String>,
    document_id: Option<i64>,
    q: Option<String>,
    limit: Option<usize>,
}

async fn search_clauses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClauseSearchParams>,
) -> impl IntoResponse {
    let filter = ClauseFilter {
        clause_type: params.clause_type,
        risk_level: params.risk_level,
        document_id: params.document_id,
        content_query: params.q,
        limit: params.limit.unwrap_or(20).min(100),
    };

    match state.store.search_clauses(&filter) {
        Ok(clauses) => {
            let total = clauses.len();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "clauses": clauses, "total": total })),
            )
        }
        Err(e) => error_response(e),
    }
}

async fn risk_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let clauses = match state.store.clauses_for_document(id) {
        Ok(clauses) => clauses,
        Err(e) => return error_response(e),
    };

    let mut risk_counts: HashMap<String, i64> = HashMap::new();
    let mut by_type: HashMap<String, i64> = HashMap::new();
    for clause in &clauses {
        if let Some(level) = &clause.risk_level {
            *risk_counts.entry(level.clone()).or_default() += 1;
        }
        *by_type.entry(clause.clause_type.clone()).or_default() += 1;
    }

    let highlights: Vec<_> = clauses
        .iter()
        .filter(|c| {
            matches!(c.risk_level.as_deref(), Some("critical") | Some("high"))
        })
        .take(10)
        .map(|c| {
            serde_json::json!({
                "clause_type": c.clause_type,
                "risk_level": c.risk_level,
                "summary": c.summary.clone().unwrap_or_else(|| {
                    c.content.chars().take(200).collect()
                }),
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "document_id": id,
            "overall_risk": overall_risk(&risk_counts),
            "risk_summary": risk_counts,
            "clause_breakdown": by_type,
            "high_risk_highlights": highlights,
        })),
    )
}

// ---------------------------------------------------------------
// Entities & graph
// ---------------------------------------------------------------

async fn extract_entities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let text = match document_text(&state, id) {
        Ok(text) => text,
        Err(e) => return error_response(e),
    };

    let (entities, raw_relationships) = match state.entity_extractor.extract(&text).await {
        Ok(out) => out,
        Err(e) => return error_response(e),
    };

    if let Err(e) = state.store.delete_entities_for_document(id) {
        return error_response(e);
    }

    // Insert entities, then resolve name-based relationships to their IDs
    let mut id_by_name: HashMap<String, i64> = HashMap::new();
    for entity in &entities {
        let result = state.store.add_entity(&NewEntity {
            doc_id: id,
            entity_type: entity.entity_type.clone(),
            name: entity.name.clone(),
            normalized_name: entity.normalized_name.clone(),
            value: entity.value.clone(),
            confidence: Some(entity.confidence),
            context: entity.context.clone(),
            page_number: None,
        });
        match result {
            Ok(entity_id) => {
                id_by_name.insert(entity.normalized_name.clone(), entity_id);
            }
            Err(e) => return error_response(e),
        }
    }

    let resolved = resolve_relationships(raw_relationships, &id_by_name);
    for rel in &resolved {
        let result = state.store.add_relationship(
            id,
            rel.source_entity_id,
            rel.target_entity_id,
            &rel.relationship_type,
            rel.description.as_deref(),
            Some(rel.confidence),
        );
        if let Err(e) = result {
            return error_response(e);
        }
    }

    info!(
        "Extracted {} entities and {} relationships from document {}",
        entities.len(),
        resolved.len(),
        id
    );
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "document_id": id,
            "entities": entities.len(),
            "relationships": resolved.len(),
        })),
    )
}

async fn get_graph(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> impl IntoResponse {
    let entities = match state.store.entities_for_document(id) {
        Ok(entities) => entities,
        Err(e) => return error_response(e),
    };
    let relationships = match state.store.relationships_for_document(id) {
        Ok(relationships) => relationships,
        Err(e) => return error_response(e),
    };

    let mut entity_types: HashMap<String, i64> = HashMap::new();
    for e in &entities {
        *entity_types.entry(e.entity_type.clone()).or_default() += 1;
    }

    let nodes: Vec<_> = entities
        .iter()
        .map(|e| {
            serde_json::json!({
                "id": e.id,
                "label": e.name,
                "type": e.entity_type,
                "value": e.value,
                "normalized": e.normalized_name,
            })
        })
        .collect();
    let edges: Vec<_> = relationships
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.id,
                "source": r.source_entity_id,
                "target": r.target_entity_id,
                "type": r.relationship_type,
                "label": r.description.clone().unwrap_or_else(|| r.relationship_type.clone()),
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "document_id": id,
            "nodes": nodes,
            "edges": edges,
            "stats": {
                "total_entities": entities.len(),
                "total_relationships": relationships.len(),
                "entity_types": entity_types,
            },
        })),
    )
}

// src/api/http/query.rs
// RAG chat endpoint (§6: POST /api/query).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::MessageRole;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/query", post(query))
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    notebook_id: String,
    query: String,
    #[serde(default = "default_mode")]
    #[allow(dead_code)]
    mode: String,
    #[serde(default = "default_true")]
    include_sources: bool,
    #[serde(default = "default_max_sources")]
    max_sources: usize,
    #[serde(default)]
    session_id: Option<String>,
}

fn default_mode() -> String {
    "chat".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_sources() -> usize {
    6
}

#[derive(Debug, Serialize)]
struct SourceChunk {
    chunk_id: Uuid,
    text: String,
    score: f32,
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct QueryMetadata {
    execution_time_ms: u128,
    model: String,
    retrieval_strategy: String,
    node_count: usize,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    success: bool,
    response: String,
    sources: Vec<SourceChunk>,
    metadata: QueryMetadata,
}

fn user_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> AppResult<Json<QueryResponse>> {
    let _timer = metrics::RequestTimer::new("api_query");
    let user_id = user_id_from_headers(&headers);

    if req.query.trim().is_empty() {
        return Err(AppError::Validation("query must not be empty".to_string()));
    }

    let start = Instant::now();
    let mut engine = state.rag_engine_for(&req.notebook_id, &user_id);

    let (answer, context) = engine
        .chat(&req.query)
        .await
        .map_err(AppError::from)?;

    // Persist the exchange so conversation memory survives a notebook
    // switch (§4.3), and hand the mutated engine back to the cache.
    state
        .conversation_store
        .append(&req.notebook_id, &user_id, MessageRole::User, &req.query)
        .await
        .map_err(AppError::from)?;
    state
        .conversation_store
        .append(&req.notebook_id, &user_id, MessageRole::Assistant, &answer)
        .await
        .map_err(AppError::from)?;
    state.store_rag_engine(&req.notebook_id, &user_id, engine);

    let sources = if req.include_sources {
        context
            .into_iter()
            .take(req.max_sources)
            .map(|s| SourceChunk {
                chunk_id: s.chunk.chunk_id,
                text: s.chunk.text,
                score: s.score,
                metadata: s.chunk.metadata,
            })
            .collect()
    } else {
        Vec::new()
    };

    let _ = req.session_id;
    Ok(Json(QueryResponse {
        success: true,
        response: answer,
        metadata: QueryMetadata {
            execution_time_ms: start.elapsed().as_millis(),
            model: state.llm.name().to_string(),
            retrieval_strategy: state.config.retrieval.strategy.clone(),
            node_count: sources.len(),
        },
        sources,
    }))
}

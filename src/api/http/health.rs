// src/api/http/health.rs
// Health check and readiness endpoints for load balancers and orchestrators.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    vector_store: &'static str,
    app_database: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let vector_store_ok = state.vector_store.health_check().await.unwrap_or(false);

    let app_database_ok = match &state.database_pool {
        Some(pool) => sqlx::query("SELECT 1").fetch_one(pool).await.is_ok(),
        None => true,
    };

    let response = HealthResponse {
        status: if vector_store_ok && app_database_ok { "healthy" } else { "unhealthy" },
        vector_store: if vector_store_ok { "ok" } else { "error" },
        app_database: if app_database_ok { "ok" } else { "error" },
    };

    if vector_store_ok && app_database_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /ready
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    health_check(State(state)).await
}

/// GET /live
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "alive"})))
}

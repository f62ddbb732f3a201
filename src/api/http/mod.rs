// src/api/http/mod.rs
// Assembles the full HTTP surface (§6) as one router mounted on `AppState`.

pub mod health;
pub mod query;
pub mod sql_chat;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/live", get(health::liveness_check))
        .merge(query::router())
        .merge(sql_chat::router())
}

// src/api/mod.rs
// HTTP/SSE surface (C12): auth, streaming turn endpoint, memory/affinity/graph
// read and delete endpoints, plus ambient health/metrics.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/auth/token", post(handlers::issue_token))
        .route("/sse/message", post(handlers::sse_message))
        .route("/memories/{id}", get(handlers::get_memory))
        .route("/memories", delete(handlers::delete_memories))
        .route("/affinity", get(handlers::get_affinity))
        .route("/affinity/history", get(handlers::get_affinity_history))
        .route("/graph", get(handlers::get_graph))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// src/error.rs
// Core error taxonomy shared across components.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Conceptual error kinds a component boundary classifies into.
///
/// The fast path degrades on `StoreTransient`; the slow path (outbox worker)
/// retries `StoreTransient`, DLQs `StorePermanent`, and routes `PolicyReview`
/// to `pending_review`. `Conflict` and `IdempotencyReplay` are not failures —
/// they are normal turn outcomes that short-circuit the default reply path.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("transient store error: {0}")]
    StoreTransient(String),

    #[error("permanent store error: {0}")]
    StorePermanent(String),

    #[error("flagged for policy review: {0}")]
    PolicyReview(String),

    #[error("conflict detected, clarification required")]
    Conflict,

    #[error("idempotency replay")]
    IdempotencyReplay,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            CoreError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            CoreError::StoreTransient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            CoreError::StorePermanent(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            CoreError::PolicyReview(msg) => (StatusCode::ACCEPTED, msg.clone()),
            CoreError::Conflict => (StatusCode::OK, "clarification required".to_string()),
            CoreError::IdempotencyReplay => (StatusCode::OK, "replayed".to_string()),
            CoreError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, axum::Json(json!({ "error": body }))).into_response()
    }
}

/// Result kind returned by sink operations in the outbox worker: replaces
/// exceptions-as-control-flow with an explicit branch the worker matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Ok,
    Transient,
    Permanent,
    Review,
}

/// Graph store adapter errors (C2).
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("transient graph store error: {0}")]
    Transient(String),
    #[error("permanent graph store error: {0}")]
    Permanent(String),
}

/// Vector store adapter errors (C3).
#[derive(Debug, Error)]
pub enum VectorError {
    #[error("transient vector store error: {0}")]
    Transient(String),
    #[error("permanent vector store error: {0}")]
    Permanent(String),
}

/// Embedding client errors (C4).
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("transient embedding error: {0}")]
    Transient(String),
    #[error("permanent embedding error: {0}")]
    Permanent(String),
}

/// LLM client errors (C5), classified the way the outbox worker needs to
/// branch: auth vs. network vs. parse.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm auth error: {0}")]
    Auth(String),
    #[error("llm network error: {0}")]
    Network(String),
    #[error("llm parse error: {0}")]
    Parse(String),
    #[error("llm unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    pub fn outcome(&self) -> SinkOutcome {
        match self {
            LlmError::Auth(_) => SinkOutcome::Permanent,
            LlmError::Network(_) => SinkOutcome::Transient,
            LlmError::Parse(_) => SinkOutcome::Review,
            LlmError::Unavailable(_) => SinkOutcome::Transient,
        }
    }
}

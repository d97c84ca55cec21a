// src/api/handlers.rs

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{create_token, verify_token};
use crate::conversation::TurnRequest;
use crate::db::deletion_audit::AffectedRecords;
use crate::db::types::MemoryStatus;
use crate::error::CoreError;
use crate::state::AppState;

fn bearer_user_id(headers: &HeaderMap, state: &AppState) -> Result<String, CoreError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::Auth("missing authorization header".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| CoreError::Auth("expected a bearer token".into()))?;
    let claims = verify_token(&state.config.store.jwt_secret, token)
        .map_err(|e| CoreError::Auth(e.to_string()))?;
    Ok(claims.sub)
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.pool).await.is_ok();
    let vector_ok = state.vector.health_check().await;
    let status = if db_ok && vector_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(serde_json::json!({
            "db": db_ok,
            "vector": vector_ok,
        })),
    )
}

#[derive(Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub user_id: String,
}

pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, CoreError> {
    let user_id = req.user_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let access_token = create_token(&state.config.store.jwt_secret, &user_id)
        .map_err(|e| CoreError::Internal(e))?;
    Ok(Json(TokenResponse { access_token, user_id }))
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub evaluation_mode: bool,
}

pub async fn sse_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<MessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, CoreError> {
    let user_id = bearer_user_id(&headers, &state)?;

    crate::metrics::connection_opened();
    let turn = TurnRequest {
        user_id,
        session_id: req.session_id,
        message: req.message,
        idempotency_key: req.idempotency_key,
        evaluation_mode: req.evaluation_mode,
    };

    let frames = state.conversation.clone().stream_turn(turn);
    let stream = frames.map(|frame| {
        let data = serde_json::to_string(&frame).unwrap_or_default();
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn get_memory(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let user_id = bearer_user_id(&headers, &state)?;
    let memory = state.memories.get(&id).await.map_err(CoreError::from)?;
    match memory {
        Some(m) if m.user_id == user_id && m.status != MemoryStatus::Deleted => {
            Ok(Json(serde_json::to_value(m).map_err(|e| CoreError::Internal(e.into()))?))
        }
        _ => Err(CoreError::NotFound("memory not found".into())),
    }
}

#[derive(Deserialize)]
pub struct DeleteMemoriesRequest {
    #[serde(default)]
    pub memory_ids: Vec<String>,
    #[serde(default)]
    pub delete_all: bool,
}

#[derive(Serialize)]
pub struct DeleteMemoriesResponse {
    pub accepted: bool,
    pub deletion_audit_id: String,
}

/// GDPR deletion (§4.12): soft-deletes the requested memories (or every
/// active memory, given `delete_all`), enqueues a sink-teardown event per
/// memory, and records a verifiable audit of exactly which records were
/// affected.
pub async fn delete_memories(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DeleteMemoriesRequest>,
) -> Result<Json<DeleteMemoriesResponse>, CoreError> {
    let user_id = bearer_user_id(&headers, &state)?;

    if !req.delete_all && req.memory_ids.is_empty() {
        return Err(CoreError::Validation(
            "must supply memory_ids or delete_all".into(),
        ));
    }

    let targets = if req.delete_all {
        state.memories.recent_active(&user_id, 100_000).await.map_err(CoreError::from)?
    } else {
        let mut targets = Vec::new();
        for id in &req.memory_ids {
            if let Some(memory) = state.memories.get_active(id).await.map_err(CoreError::from)? {
                if memory.user_id == user_id {
                    targets.push(memory);
                }
            }
        }
        targets
    };

    let mut graph_node_ids = Vec::new();
    let mut vector_primary_ids = Vec::new();
    let mut memory_ids = Vec::new();

    for memory in &targets {
        state.memories.soft_delete(&memory.id).await.map_err(CoreError::from)?;
        if let Some(mapping) = state.id_mapping.get(&user_id, &memory.id).await.map_err(CoreError::from)? {
            if let Some(node_id) = mapping.graph_node_id {
                graph_node_ids.push(node_id);
            }
            if let Some(primary_id) = mapping.vector_primary_id {
                vector_primary_ids.push(primary_id);
            }
        }
        state.outbox_store.insert_delete_event(&memory.id, &user_id).await.map_err(CoreError::from)?;
        memory_ids.push(memory.id.clone());
    }

    let records = AffectedRecords {
        memory_ids,
        graph_node_ids,
        vector_primary_ids,
    };
    let deletion_audit_id = state
        .deletion_audit
        .create(&user_id, "gdpr_erasure", &records)
        .await
        .map_err(CoreError::from)?;
    state.deletion_audit.mark_completed(&deletion_audit_id).await.map_err(CoreError::from)?;

    info!(user_id, deletion_audit_id, count = targets.len(), "gdpr deletion enqueued");
    Ok(Json(DeleteMemoriesResponse { accepted: true, deletion_audit_id }))
}

pub async fn get_affinity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, CoreError> {
    let user_id = bearer_user_id(&headers, &state)?;
    let (score, affinity_state) = state.affinity.current(&user_id).await.map_err(CoreError::from)?;
    Ok(Json(serde_json::json!({ "score": score, "state": affinity_state.as_str() })))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

pub async fn get_affinity_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let user_id = bearer_user_id(&headers, &state)?;
    let rows = crate::db::affinity::AffinityStore::new(state.pool.clone())
        .history_since_days(&user_id, q.days)
        .await
        .map_err(CoreError::from)?;
    let history: Vec<_> = rows
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "old_score": r.old_score,
                "new_score": r.new_score,
                "delta": r.delta,
                "trigger_event": r.trigger_event,
                "created_at": r.created_at,
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "history": history })))
}

#[derive(Deserialize)]
pub struct GraphQuery {
    pub day: Option<i64>,
}

pub async fn get_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<GraphQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let user_id = bearer_user_id(&headers, &state)?;
    let (nodes, edges) = state.graph.nodes_and_edges(&user_id, q.day).await.map_err(CoreError::from)?;
    let nodes: Vec<_> = nodes
        .into_iter()
        .map(|n| serde_json::json!({ "id": n.entity_id, "name": n.name, "entity_type": n.entity_type, "mention_count": n.mention_count }))
        .collect();
    let edges: Vec<_> = edges
        .into_iter()
        .map(|e| serde_json::json!({ "source": e.source_id, "target": e.target_id, "relation_type": e.relation_type, "weight": e.weight }))
        .collect();
    Ok(Json(serde_json::json!({ "nodes": nodes, "edges": edges })))
}

// src/main.rs

use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use relmem::{api, config, db, embedding, graph, llm, metrics, state::AppState, vector};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::init_config();
    metrics::init_metrics();

    tracing::info!(bind_addr = %config.server.bind_addr, "starting relmem");

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&config.store.database_url)
        .await?;
    db::init_schema(&pool).await?;

    let vector_store: vector::SharedVectorStore = Arc::new(
        vector::QdrantVectorStore::connect(&config.store.qdrant_url, config.algo.embedding_dim as u64).await?,
    );
    let graph_store: graph::SharedGraphStore = Arc::new(graph::SqliteGraphStore::new(pool.clone()));
    let embedding_client: embedding::SharedEmbeddingClient = Arc::new(embedding::HttpEmbeddingClient::new(
        config.store.embedding_endpoint.clone(),
        config.algo.embedding_dim,
    ));
    let llm_provider: llm::SharedLlmProvider = Arc::new(llm::HttpLlmProvider::new(
        config.store.llm_endpoint.clone(),
        config.store.llm_model.clone(),
    ));

    let state = AppState::new(config, pool, graph_store, vector_store, embedding_client, llm_provider);

    state.worker.clone().spawn();
    spawn_affinity_decay_task(state.clone());
    spawn_graph_decay_task(state.clone());

    let app = api::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&state.config.server.bind_addr).await?;
    tracing::info!(addr = %state.config.server.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Daily silence-decay tick (§4.6, S6): runs once per day, independent of
/// how often any given user is actually online.
fn spawn_affinity_decay_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(86_400));
        interval.tick().await;
        loop {
            interval.tick().await;
            match state.affinity.apply_silence_decay_tick().await {
                Ok(n) => tracing::info!(users_decayed = n, "silence decay tick complete"),
                Err(e) => tracing::warn!(error = %e, "silence decay tick failed"),
            }
        }
    });
}

/// Periodic edge-weight decay sweep (§4.3): recomputes exponential decay for
/// every graph relation so idle edges fade even without new mentions.
fn spawn_graph_decay_task(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3_600));
        interval.tick().await;
        loop {
            interval.tick().await;
            let half_life = state.config.algo.half_life_days;
            let floor = state.config.algo.edge_weight_floor;
            match state.affinity.all_user_ids().await {
                Ok(user_ids) => {
                    for user_id in user_ids {
                        if let Err(e) = state.graph.apply_time_decay(&user_id, half_life, floor).await {
                            tracing::warn!(error = %e, user_id, "graph decay sweep failed for user");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "graph decay sweep failed to list users"),
            }
        }
    });
}

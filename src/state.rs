// src/state.rs
// Application state: every service wired together behind Arc, built once at
// startup and shared across axum handlers via `State`.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::affinity::AffinityService;
use crate::config::Config;
use crate::conflict::ConflictService;
use crate::conversation::ConversationService;
use crate::db::affinity::AffinityStore;
use crate::db::bridge::BridgeStore;
use crate::db::clarifications::ClarificationStore;
use crate::db::conflicts::ConflictStore;
use crate::db::deletion_audit::DeletionAuditStore;
use crate::db::id_mapping::IdMappingStore;
use crate::db::memories::MemoryStore;
use crate::db::outbox::OutboxStore;
use crate::embedding::SharedEmbeddingClient;
use crate::graph::SharedGraphStore;
use crate::llm::SharedLlmProvider;
use crate::outbox::{OutboxWorker, OutboxWriter};
use crate::retrieval::RetrievalService;
use crate::vector::SharedVectorStore;

pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub memories: MemoryStore,
    pub outbox_store: OutboxStore,
    pub id_mapping: IdMappingStore,
    pub deletion_audit: DeletionAuditStore,
    pub graph: SharedGraphStore,
    pub vector: SharedVectorStore,
    pub conversation: Arc<ConversationService>,
    pub affinity: Arc<AffinityService>,
    pub worker: Arc<OutboxWorker>,
}

impl AppState {
    pub fn new(
        config: Config,
        pool: SqlitePool,
        graph: SharedGraphStore,
        vector: SharedVectorStore,
        embedding: SharedEmbeddingClient,
        llm: SharedLlmProvider,
    ) -> Arc<Self> {
        let memories = MemoryStore::new(pool.clone());
        let bridge = BridgeStore::new(pool.clone());
        let outbox_store = OutboxStore::new(pool.clone());
        let id_mapping = IdMappingStore::new(pool.clone());
        let deletion_audit = DeletionAuditStore::new(pool.clone());
        let affinity_store = AffinityStore::new(pool.clone());
        let conflict_store = ConflictStore::new(pool.clone());
        let clarification_store = ClarificationStore::new(pool.clone());

        let affinity = Arc::new(AffinityService::new(
            affinity_store,
            config.algo.silence_decay_per_day,
            config.algo.silence_decay_floor,
        ));
        let retrieval = Arc::new(RetrievalService::new(
            vector.clone(),
            graph.clone(),
            bridge.clone(),
            memories.clone(),
            embedding.clone(),
            config.algo.clone(),
        ));
        let conflict = Arc::new(ConflictService::new(
            conflict_store,
            clarification_store,
            memories.clone(),
            0.8,
            config.algo.clarification_timeout_turns,
            config.algo.clarification_rate_per_hour,
        ));
        let outbox_writer = Arc::new(OutboxWriter::new(pool.clone(), config.algo.idempotency_ttl_hours));

        let conversation = Arc::new(ConversationService::new(
            affinity.clone(),
            retrieval,
            conflict,
            memories.clone(),
            outbox_writer,
            llm.clone(),
            embedding,
            config.algo.clone(),
        ));

        let worker = Arc::new(OutboxWorker {
            outbox: outbox_store.clone(),
            bridge,
            id_mapping: id_mapping.clone(),
            graph: graph.clone(),
            vector: vector.clone(),
            llm,
            config: config.algo.clone(),
        });

        Arc::new(Self {
            config,
            pool,
            memories,
            outbox_store,
            id_mapping,
            deletion_audit,
            graph,
            vector,
            conversation,
            affinity,
            worker,
        })
    }
}

// src/outbox/worker.rs
// Outbox worker (C7): leased polling, per-sink checkpoints, retries, DLQ,
// timeout recovery. Grounded on this codebase's background-scheduler idiom
// (tokio::spawn + sleep loop) composed with its transactional-ledger and
// best-effort-recovery patterns.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::AlgoConfig;
use crate::db::bridge::BridgeStore;
use crate::db::id_mapping::IdMappingStore;
use crate::db::outbox::{derive_status, OutboxStore};
use crate::db::types::{OutboxEventKind, OutboxEventRow, OutboxPayload, OutboxStatus};
use crate::error::SinkOutcome;
use crate::graph::SharedGraphStore;
use crate::llm::SharedLlmProvider;
use crate::vector::SharedVectorStore;

pub struct OutboxWorker {
    pub outbox: OutboxStore,
    pub bridge: BridgeStore,
    pub id_mapping: IdMappingStore,
    pub graph: SharedGraphStore,
    pub vector: SharedVectorStore,
    pub llm: SharedLlmProvider,
    pub config: AlgoConfig,
}

impl OutboxWorker {
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("outbox worker started");
            loop {
                if let Err(e) = self.run_cycle().await {
                    error!(error = %e, "outbox worker cycle failed");
                }
                if let Err(e) = self
                    .outbox
                    .reclaim_stale_leases(self.config.worker_lease_timeout_s as i64)
                    .await
                {
                    error!(error = %e, "stale lease reclaim failed");
                }
                sleep(StdDuration::from_secs(self.config.worker_poll_interval_s)).await;
            }
        })
    }

    async fn run_cycle(&self) -> Result<()> {
        let backlog = self.outbox.backlog_depth().await?;
        let batch_size = if backlog > 1000 { 200 } else { 50 };
        if backlog > 1000 {
            warn!(backlog, "outbox backlog above high-water mark, widening batch");
        }

        let batch = self.outbox.lease_batch(batch_size).await?;
        for event in batch {
            self.process_event(event).await;
        }
        Ok(())
    }

    async fn process_event(&self, event: OutboxEventRow) {
        let outcome = match derive_status(&event) {
            OutboxStatus::Processing => self.apply_sinks(&event).await,
            _ => return,
        };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.outbox.mark_done(&event.id, &event.memory_id).await {
                    error!(event_id = %event.id, error = %e, "failed to mark outbox event done");
                }
            }
            Err((sink_outcome, message)) => self.handle_failure(&event, sink_outcome, &message).await,
        }
    }

    async fn handle_failure(&self, event: &OutboxEventRow, outcome: SinkOutcome, message: &str) {
        match outcome {
            SinkOutcome::Review => {
                if let Err(e) = self.outbox.move_to_pending_review(&event.id, message).await {
                    error!(error = %e, "failed to move event to pending_review");
                }
            }
            SinkOutcome::Permanent => {
                if let Err(e) = self.outbox.move_to_dlq(&event.id, message).await {
                    error!(error = %e, "failed to move event to dlq");
                }
            }
            SinkOutcome::Transient | SinkOutcome::Ok => {
                let retries = self.outbox.retry_count(&event.id).await.unwrap_or(0);
                if retries + 1 > self.config.dlq_retry_threshold as i64 {
                    warn!(event_id = %event.id, retries, "retry threshold exceeded, moving to dlq");
                    let _ = self.outbox.move_to_dlq(&event.id, message).await;
                } else {
                    let cooloff_s = backoff_seconds(retries as u32);
                    let backoff_message = format!("{message} (cooloff {cooloff_s}s)");
                    let retry_after = chrono::Utc::now() + chrono::Duration::seconds(cooloff_s as i64);
                    let _ = self.outbox.retry_later(&event.id, &backoff_message, retry_after).await;
                }
            }
        }
    }

    /// Runs the sink pipeline for one event, resuming from whatever
    /// checkpoints are already set so a restart after a partial crash
    /// doesn't redo completed sinks (§4.7, property 6).
    async fn apply_sinks(&self, event: &OutboxEventRow) -> Result<(), (SinkOutcome, String)> {
        let payload: OutboxPayload = serde_json::from_str(&event.payload)
            .map_err(|e| (SinkOutcome::Permanent, format!("bad payload json: {e}")))?;

        if matches!(OutboxEventKind::parse(&event.kind), OutboxEventKind::Delete) {
            return self.apply_delete(event, &payload).await;
        }

        if event.graph_written_at.is_none() {
            let extraction = self
                .llm
                .extract(&payload.content)
                .await
                .map_err(|e| (e.outcome(), e.to_string()))?;

            for entity in &extraction.entities {
                let entity_id = self
                    .graph
                    .upsert_entity(&payload.user_id, &entity.name, &entity.entity_type)
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
                self.bridge
                    .link(&payload.user_id, &event.memory_id, &entity_id, 1.0, "extraction")
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
            }

            for relation in &extraction.relations {
                let source_id = self
                    .graph
                    .upsert_entity(&payload.user_id, &relation.source, "concept")
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
                let target_id = self
                    .graph
                    .upsert_entity(&payload.user_id, &relation.target, "concept")
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
                self.graph
                    .upsert_relation(&payload.user_id, &source_id, &target_id, &relation.relation_type, 0.2)
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
                self.id_mapping
                    .upsert(&payload.user_id, &event.memory_id, Some(&source_id), None)
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
            }

            self.outbox
                .set_checkpoint(&event.id, "graph_written_at")
                .await
                .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
            self.outbox
                .set_checkpoint(&event.id, "bridge_written_at")
                .await
                .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
        }

        if event.vector_written_at.is_none() {
            let Some(embedding) = &payload.embedding else {
                // No embedding captured for this turn (degraded fast path);
                // the vector sink has nothing to write, so treat it as done.
                self.outbox
                    .set_checkpoint(&event.id, "vector_written_at")
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
                return Ok(());
            };

            let primary_id = IdMappingStore::derive_vector_primary_id(&payload.user_id, &event.memory_id);
            self.vector
                .upsert(&primary_id, &payload.user_id, embedding, &event.memory_id)
                .await
                .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
            self.id_mapping
                .upsert(&payload.user_id, &event.memory_id, None, Some(&primary_id))
                .await
                .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
            self.outbox
                .set_checkpoint(&event.id, "vector_written_at")
                .await
                .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
        }

        Ok(())
    }

    async fn apply_delete(
        &self,
        event: &OutboxEventRow,
        payload: &OutboxPayload,
    ) -> Result<(), (SinkOutcome, String)> {
        if let Ok(Some(mapping)) = self
            .id_mapping
            .get(&payload.user_id, &event.memory_id)
            .await
        {
            if let Some(primary_id) = &mapping.vector_primary_id {
                self.vector
                    .delete(&[primary_id.clone()])
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
            }
            if let Some(entity_id) = &mapping.graph_node_id {
                self.graph
                    .delete_entity(&payload.user_id, entity_id)
                    .await
                    .map_err(|e| (SinkOutcome::Transient, e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn backoff_seconds(retry_count: u32) -> u64 {
    2u64.saturating_pow(retry_count.min(10))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::graph::SqliteGraphStore;
    use crate::llm::MockLlmProvider;
    use crate::vector::VectorStore;

    /// Counts upserts instead of talking to Qdrant, so the crash-recovery
    /// test can assert the vector sink ran exactly once.
    struct CountingVectorStore {
        upserts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VectorStore for CountingVectorStore {
        async fn upsert(&self, _primary_id: &str, _user_id: &str, _vector: &[f32], _memory_id: &str) -> Result<()> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn search(&self, _user_id: &str, _vector: &[f32], _top_k: usize) -> Result<Vec<crate::vector::VectorHit>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _primary_ids: &[String]) -> Result<()> {
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    async fn test_pool() -> sqlx::SqlitePool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::schema::init_schema(&pool).await.unwrap();
        pool
    }

    /// A worker that crashed after the graph checkpoint but before the
    /// vector checkpoint must resume from the vector step only, never
    /// re-running graph extraction (§4.7 property 6, S4).
    #[tokio::test]
    async fn resumes_from_checkpoint_without_redoing_completed_sinks() {
        let pool = test_pool().await;
        let mut tx = pool.begin().await.unwrap();
        let memory_id = crate::db::memories::MemoryStore::insert_pending_tx(
            &mut tx,
            "u1",
            "I met Priya at the conference",
            0.0,
            chrono::Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let payload = OutboxPayload {
            user_id: "u1".to_string(),
            content: "I met Priya at the conference".to_string(),
            embedding: Some(vec![0.1, 0.2, 0.3]),
        };
        let event_id;
        {
            let mut tx = pool.begin().await.unwrap();
            event_id = OutboxStore::insert_event_tx(&mut tx, &memory_id, OutboxEventKind::Upsert, &payload, None)
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let outbox = OutboxStore::new(pool.clone());
        // Simulate a worker that already leased the event and completed the
        // graph checkpoint before crashing.
        outbox.lease_batch(10).await.unwrap();
        outbox.set_checkpoint(&event_id, "graph_written_at").await.unwrap();
        outbox.set_checkpoint(&event_id, "bridge_written_at").await.unwrap();

        let vector = Arc::new(CountingVectorStore { upserts: AtomicUsize::new(0) });
        let worker = Arc::new(OutboxWorker {
            outbox: outbox.clone(),
            bridge: BridgeStore::new(pool.clone()),
            id_mapping: IdMappingStore::new(pool.clone()),
            graph: Arc::new(SqliteGraphStore::new(pool.clone())),
            vector: vector.clone(),
            llm: Arc::new(MockLlmProvider { reply: String::new() }),
            config: AlgoConfig::default(),
        });

        let event = outbox.get(&event_id).await.unwrap().unwrap();
        worker.process_event(event).await;

        assert_eq!(vector.upserts.load(Ordering::SeqCst), 1, "vector sink should run exactly once");
        let status = crate::db::memories::MemoryStore::new(pool.clone())
            .status(&memory_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, crate::db::types::MemoryStatus::Committed);
    }
}

// src/outbox/writer.rs
// Transactional Outbox writer (C6): atomic (memory row + event row) commit,
// idempotency dedup. This is the sole guarantee that a crash between "reply
// sent" and "durable write" cannot leave dangling memories or events.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::memories::MemoryStore;
use crate::db::outbox::OutboxStore;
use crate::db::types::OutboxEventKind;
use crate::db::types::OutboxPayload;

pub struct WriteOutcome {
    pub memory_id: String,
    pub replayed: bool,
}

pub struct OutboxWriter {
    pool: SqlitePool,
    outbox: OutboxStore,
    idempotency_ttl_hours: i64,
}

impl OutboxWriter {
    pub fn new(pool: SqlitePool, idempotency_ttl_hours: i64) -> Self {
        let outbox = OutboxStore::new(pool.clone());
        Self {
            pool,
            outbox,
            idempotency_ttl_hours,
        }
    }

    /// Looks up a prior reply for this (key, user_id) without writing
    /// anything — used by the conversation layer to replay a turn before
    /// doing any new work (§4.11 step 1).
    pub async fn find_idempotent(
        &self,
        key: &str,
        user_id: &str,
    ) -> Result<Option<(String, String, String)>> {
        self.outbox.find_idempotent(key, user_id).await
    }

    /// If `idempotency_key` is supplied and a non-expired prior write
    /// exists, returns it without writing anything. Otherwise inserts
    /// Memory(status=pending) and OutboxEvent(status=pending) atomically.
    /// `embedding`, when supplied, rides along in the outbox payload so the
    /// worker's vector sink (C3) has something to write without a second
    /// round-trip to the embedding client.
    pub async fn write_turn(
        &self,
        user_id: &str,
        content: &str,
        valence: f64,
        observed_at: DateTime<Utc>,
        idempotency_key: Option<&str>,
        reply_hash: &str,
        reply_text: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<WriteOutcome> {
        if let Some(key) = idempotency_key {
            if let Some((memory_id, _, _)) = self.outbox.find_idempotent(key, user_id).await? {
                return Ok(WriteOutcome {
                    memory_id,
                    replayed: true,
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        let memory_id =
            MemoryStore::insert_pending_tx(&mut tx, user_id, content, valence, observed_at).await?;

        if let Some(embedding) = &embedding {
            MemoryStore::set_embedding_tx(&mut tx, &memory_id, embedding).await?;
        }

        let payload = OutboxPayload {
            user_id: user_id.to_string(),
            content: content.to_string(),
            embedding,
        };
        OutboxStore::insert_event_tx(
            &mut tx,
            &memory_id,
            OutboxEventKind::Upsert,
            &payload,
            idempotency_key,
        )
        .await?;

        if let Some(key) = idempotency_key {
            OutboxStore::record_idempotency_tx(
                &mut tx,
                key,
                user_id,
                &memory_id,
                reply_hash,
                reply_text,
                self.idempotency_ttl_hours,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(WriteOutcome {
            memory_id,
            replayed: false,
        })
    }

    /// Used when the client supplies no idempotency key: a fresh key means
    /// this write can never collide with a prior one, which is the correct
    /// behavior for a request the caller did not ask to be retry-safe.
    pub fn derive_idempotency_key() -> String {
        Uuid::new_v4().to_string()
    }
}

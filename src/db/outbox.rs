// src/db/outbox.rs
// DAO for `outbox_events` (C6 writer primitives + C7 worker primitives).

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::types::{OutboxEventKind, OutboxEventRow, OutboxPayload, OutboxStatus};

#[derive(Clone)]
pub struct OutboxStore {
    pool: SqlitePool,
}

impl OutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Look up a prior successful write for this idempotency key, within
    /// TTL. Returns `(memory_id, reply_hash, reply_text)` if found.
    pub async fn find_idempotent(
        &self,
        key: &str,
        user_id: &str,
    ) -> Result<Option<(String, String, String)>> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT memory_id, reply_hash, reply_text, expires_at FROM idempotency_keys WHERE key = ? AND user_id = ?",
        )
        .bind(key)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((memory_id, reply_hash, reply_text, expires_at)) => {
                let expires = super::types::parse_ts(&expires_at);
                if expires > Utc::now() {
                    Ok(Some((memory_id, reply_hash, reply_text)))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    pub async fn record_idempotency_tx(
        tx: &mut Transaction<'_, Sqlite>,
        key: &str,
        user_id: &str,
        memory_id: &str,
        reply_hash: &str,
        reply_text: &str,
        ttl_hours: i64,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, user_id, memory_id, reply_hash, reply_text, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key, user_id) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(user_id)
        .bind(memory_id)
        .bind(reply_hash)
        .bind(reply_text)
        .bind(now.to_rfc3339())
        .bind((now + Duration::hours(ttl_hours)).to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Insert one pending OutboxEvent for a memory, inside the caller's
    /// transaction. This is the writer half of the atomic "memory + event"
    /// commit §4.7 requires.
    pub async fn insert_event_tx(
        tx: &mut Transaction<'_, Sqlite>,
        memory_id: &str,
        kind: OutboxEventKind,
        payload: &OutboxPayload,
        idempotency_key: Option<&str>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let event_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_id, memory_id, kind, payload, status,
                retry_count, idempotency_key, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&event_id)
        .bind(memory_id)
        .bind(kind.as_str())
        .bind(serde_json::to_string(payload)?)
        .bind(idempotency_key)
        .bind(now.to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }

    /// Lease up to `n` pending events by flipping them to `processing`. The
    /// conditional UPDATE (`WHERE status = 'pending'`) is what makes leases
    /// mutually exclusive across concurrent workers (§5). A retried event
    /// carries a `retry_after` cooloff and is not re-leasable until it
    /// elapses.
    pub async fn lease_batch(&self, n: i64) -> Result<Vec<OutboxEventRow>> {
        let now = Utc::now().to_rfc3339();
        let candidates: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM outbox_events WHERE status = 'pending' AND (retry_after IS NULL OR retry_after <= ?) ORDER BY created_at ASC LIMIT ?",
        )
        .bind(&now)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;

        let mut leased = Vec::new();
        for (id,) in candidates {
            let result = sqlx::query(
                "UPDATE outbox_events SET status = 'processing', processing_started_at = ? WHERE id = ? AND status = 'pending'",
            )
            .bind(&now)
            .bind(&id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 1 {
                if let Some(row) = self.get(&id).await? {
                    leased.push(row);
                }
            }
        }
        Ok(leased)
    }

    pub async fn get(&self, id: &str) -> Result<Option<OutboxEventRow>> {
        let row = sqlx::query_as::<_, OutboxEventRow>("SELECT * FROM outbox_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn set_checkpoint(&self, id: &str, column: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let sql = format!("UPDATE outbox_events SET {column} = ? WHERE id = ?");
        sqlx::query(&sql).bind(now).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    /// Mark done and flip the memory to committed in one transaction (§4.7 step 3).
    pub async fn mark_done(&self, id: &str, memory_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE outbox_events SET status = 'done', processed_at = ? WHERE id = ?")
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE memories SET status = 'committed', committed_at = ? WHERE id = ?")
            .bind(&now)
            .bind(memory_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Return the event to `pending` with incremented retry count, a backoff
    /// note in `error_message`, and a `retry_after` cooloff the next lease
    /// poll must respect (§4.7 step 4).
    pub async fn retry_later(&self, id: &str, error: &str, retry_after: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'pending', retry_count = retry_count + 1, error_message = ?, retry_after = ? WHERE id = ?",
        )
        .bind(error)
        .bind(retry_after.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn move_to_dlq(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE outbox_events SET status = 'dlq', error_message = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn move_to_pending_review(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'pending_review', error_message = ? WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reclaim stale leases: rows in `processing` whose lease has expired
    /// are returned to `pending` (§4.7 step 5).
    pub async fn reclaim_stale_leases(&self, lease_timeout_s: i64) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - Duration::seconds(lease_timeout_s);
        let result = sqlx::query(
            "UPDATE outbox_events SET status = 'pending' WHERE status = 'processing' AND processing_started_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn retry_count(&self, id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT retry_count FROM outbox_events WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn dlq_depth(&self) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_events WHERE status = 'dlq'")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn backlog_depth(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM outbox_events WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Enqueue a deletion event so the worker removes the sink rows derived
    /// from IdMapping idempotently (§4.12).
    pub async fn insert_delete_event(&self, memory_id: &str, user_id: &str) -> Result<String> {
        let mut tx = self.pool.begin().await?;
        let id = Self::insert_event_tx(
            &mut tx,
            memory_id,
            OutboxEventKind::Delete,
            &OutboxPayload {
                user_id: user_id.to_string(),
                content: String::new(),
                embedding: None,
            },
            None,
        )
        .await?;
        tx.commit().await?;
        Ok(id)
    }

    pub fn lease_status(status: &OutboxStatus) -> &'static str {
        status.as_str()
    }
}

pub fn derive_status(row: &OutboxEventRow) -> OutboxStatus {
    OutboxStatus::parse(&row.status)
}

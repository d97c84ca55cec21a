// src/db/memories.rs
// DAO for the `memories` table (C1).

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::types::{Memory, MemoryRow, MemoryStatus};

#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new pending memory inside an existing transaction. Used by
    /// the outbox writer (C6) so the memory row and its outbox event commit
    /// atomically.
    pub async fn insert_pending_tx(
        tx: &mut Transaction<'_, Sqlite>,
        user_id: &str,
        content: &str,
        valence: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO memories (id, user_id, content, embedding, valence, status,
                conflict_status, observed_at, created_at, committed_at, metadata)
            VALUES (?, ?, ?, NULL, ?, 'pending', 'active', ?, ?, NULL, '{}')
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(content)
        .bind(valence)
        .bind(observed_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Memory>> {
        let row = sqlx::query_as::<_, MemoryRow>("SELECT * FROM memories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(MemoryRow::into_memory))
    }

    pub async fn set_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let json = serde_json::to_string(embedding)?;
        sqlx::query("UPDATE memories SET embedding = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Same update, scoped to the caller's transaction so the memory row and
    /// its embedding commit atomically with the outbox event (C6).
    pub async fn set_embedding_tx(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let json = serde_json::to_string(embedding)?;
        sqlx::query("UPDATE memories SET embedding = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn mark_committed(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE memories SET status = 'committed', committed_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_deprecated(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE memories SET conflict_status = 'deprecated' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_conflicted(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            sqlx::query("UPDATE memories SET conflict_status = 'conflicted' WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn soft_delete(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE memories SET status = 'deleted' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recent memories for a user, active (non-deleted, non-deprecated) view
    /// only — this is the "active memories" view referenced by §4.9.
    pub async fn recent_active(&self, user_id: &str, limit: i64) -> Result<Vec<Memory>> {
        let rows = sqlx::query_as::<_, MemoryRow>(
            r#"
            SELECT * FROM memories
            WHERE user_id = ? AND status != 'deleted' AND conflict_status != 'deprecated'
            ORDER BY observed_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
    }

    /// Fetch by id, but only if still active — excludes deleted and
    /// deprecated rows, so retrieval never surfaces a memory that GDPR
    /// erasure or conflict resolution has taken out of circulation (§4.9).
    pub async fn get_active(&self, id: &str) -> Result<Option<Memory>> {
        let row = sqlx::query_as::<_, MemoryRow>(
            "SELECT * FROM memories WHERE id = ? AND status != 'deleted' AND conflict_status != 'deprecated'",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(MemoryRow::into_memory))
    }

    pub async fn status(&self, id: &str) -> Result<Option<MemoryStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM memories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(s,)| MemoryStatus::parse(&s)))
    }
}

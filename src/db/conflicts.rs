// src/db/conflicts.rs
// MemoryConflict DAO (C1), read/written by the conflict service (C9).

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::types::MemoryConflictRow;

#[derive(Clone)]
pub struct ConflictStore {
    pool: SqlitePool,
}

impl ConflictStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Unordered-pair lookup: (m1, m2) and (m2, m1) are the same conflict.
    pub async fn find_pair(
        &self,
        user_id: &str,
        memory_a: &str,
        memory_b: &str,
    ) -> Result<Option<MemoryConflictRow>> {
        let row = sqlx::query_as::<_, MemoryConflictRow>(
            r#"
            SELECT * FROM memory_conflicts
            WHERE user_id = ? AND
                ((memory_1_id = ? AND memory_2_id = ?) OR (memory_1_id = ? AND memory_2_id = ?))
            "#,
        )
        .bind(user_id)
        .bind(memory_a)
        .bind(memory_b)
        .bind(memory_b)
        .bind(memory_a)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert(
        &self,
        user_id: &str,
        memory_1_id: &str,
        memory_2_id: &str,
        conflict_type: &str,
        common_topic: &[String],
        confidence: f64,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO memory_conflicts (id, user_id, memory_1_id, memory_2_id, conflict_type,
                common_topic, confidence, status, created_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, '{}')
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(memory_1_id)
        .bind(memory_2_id)
        .bind(conflict_type)
        .bind(serde_json::to_string(common_topic)?)
        .bind(confidence)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<MemoryConflictRow>> {
        let row = sqlx::query_as::<_, MemoryConflictRow>(
            "SELECT * FROM memory_conflicts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn resolve(
        &self,
        id: &str,
        preferred_memory_id: &str,
        method: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE memory_conflicts SET status = 'resolved', resolution_method = ?,
                preferred_memory_id = ?, resolved_at = ?
            WHERE id = ?
            "#,
        )
        .bind(method)
        .bind(preferred_memory_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ignore(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE memory_conflicts SET status = 'ignored', resolved_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// src/db/clarifications.rs
// ClarificationSession DAO (C1), lifecycle driven by the conflict service (C9).

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::types::ClarificationSessionRow;

#[derive(Clone)]
pub struct ClarificationStore {
    pool: SqlitePool,
}

impl ClarificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// At most `rate_per_hour` `pending` clarifications per user per rolling
    /// hour (§4.9, §9 `clarification_rate_per_hour`).
    pub async fn can_start_new(&self, user_id: &str, rate_per_hour: u32) -> Result<bool> {
        let cutoff = Utc::now() - Duration::hours(1);
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM clarification_sessions WHERE user_id = ? AND status = 'pending' AND created_at >= ?",
        )
        .bind(user_id)
        .bind(cutoff.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 < rate_per_hour as i64)
    }

    pub async fn create(
        &self,
        user_id: &str,
        conflict_id: &str,
        session_id: &str,
        question: &str,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO clarification_sessions (id, user_id, conflict_id, session_id, question, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(conflict_id)
        .bind(session_id)
        .bind(question)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn pending_for_session(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ClarificationSessionRow>> {
        let row = sqlx::query_as::<_, ClarificationSessionRow>(
            "SELECT * FROM clarification_sessions WHERE user_id = ? AND session_id = ? AND status = 'pending' ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn answer(&self, id: &str, response: &str) -> Result<()> {
        sqlx::query(
            "UPDATE clarification_sessions SET status = 'answered', user_response = ?, answered_at = ? WHERE id = ?",
        )
        .bind(response)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn bump_turn(&self, id: &str) -> Result<i64> {
        sqlx::query("UPDATE clarification_sessions SET turns_waited = turns_waited + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let row: (i64,) =
            sqlx::query_as("SELECT turns_waited FROM clarification_sessions WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn timeout(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE clarification_sessions SET status = 'timeout' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// src/db/affinity.rs
// Append-only AffinityHistory ledger (C1), grounded on the same
// insert-then-read-latest pattern used for other per-user running ledgers
// in this codebase.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::types::{AffinityHistoryRow, AffinityState};

#[derive(Clone)]
pub struct AffinityStore {
    pool: SqlitePool,
}

impl AffinityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current score is the latest row's new_score, or 0.0 (neutral) if the
    /// user has no history yet.
    pub async fn current_score(&self, user_id: &str) -> Result<f64> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT new_score FROM affinity_history WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(s,)| s).unwrap_or(0.0))
    }

    pub async fn latest(&self, user_id: &str) -> Result<Option<AffinityHistoryRow>> {
        let row = sqlx::query_as::<_, AffinityHistoryRow>(
            "SELECT * FROM affinity_history WHERE user_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn append(
        &self,
        user_id: &str,
        old_score: f64,
        new_score: f64,
        delta: f64,
        trigger_event: &str,
        signals: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO affinity_history (id, user_id, old_score, new_score, delta, trigger_event, signals, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(old_score)
        .bind(new_score)
        .bind(delta)
        .bind(trigger_event)
        .bind(serde_json::to_string(signals)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn history_since_days(
        &self,
        user_id: &str,
        days: i64,
    ) -> Result<Vec<AffinityHistoryRow>> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let rows = sqlx::query_as::<_, AffinityHistoryRow>(
            "SELECT * FROM affinity_history WHERE user_id = ? AND created_at >= ? ORDER BY created_at ASC",
        )
        .bind(user_id)
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Last interaction timestamp, used by the silence-decay scheduler to
    /// compute how many days a user has gone quiet (§4.6, S6).
    pub async fn last_interaction(&self, user_id: &str) -> Result<Option<chrono::DateTime<Utc>>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT created_at FROM affinity_history WHERE user_id = ? AND trigger_event != 'silence_decay' ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(s,)| super::types::parse_ts(&s)))
    }

    pub async fn all_user_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT user_id FROM affinity_history")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }
}

pub fn state_for(score: f64) -> AffinityState {
    AffinityState::from_score(score)
}

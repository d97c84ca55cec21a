// src/db/bridge.rs
// MemoryEntity bridge table (C1 §3): per-user (memory_id <-> entity_id) links
// so retrieval can expand a memory to graph neighbors without a
// vector-store-level schema change.

use anyhow::Result;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct BridgeStore {
    pool: SqlitePool,
}

impl BridgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn link(
        &self,
        user_id: &str,
        memory_id: &str,
        entity_id: &str,
        confidence: f64,
        source: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memory_entities (user_id, memory_id, entity_id, confidence, source)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, memory_id, entity_id) DO UPDATE SET
                confidence = excluded.confidence
            "#,
        )
        .bind(user_id)
        .bind(memory_id)
        .bind(entity_id)
        .bind(confidence)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Entities linked to each of `memory_ids`, grouped by memory, so the
    /// re-ranker can score each candidate by the entities that memory
    /// actually links to rather than a pooled entity set.
    pub async fn entities_by_memory(
        &self,
        user_id: &str,
        memory_ids: &[String],
    ) -> Result<std::collections::HashMap<String, Vec<String>>> {
        if memory_ids.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let placeholders = memory_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT memory_id, entity_id FROM memory_entities WHERE user_id = ? AND memory_id IN ({placeholders})"
        );
        let mut q = sqlx::query_as::<_, (String, String)>(&sql).bind(user_id);
        for id in memory_ids {
            q = q.bind(id);
        }
        let rows = q.fetch_all(&self.pool).await?;
        let mut out: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        for (memory_id, entity_id) in rows {
            out.entry(memory_id).or_default().push(entity_id);
        }
        Ok(out)
    }
}

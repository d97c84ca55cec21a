// src/db/id_mapping.rs
// IdMapping bridge (C1): (user_id, memory_id) -> (graph_node_id?, vector_primary_id?).
// Used by GDPR deletion and consistency checks to resolve a memory to the
// sink-side ids that must be torn down or rewritten.

use anyhow::Result;
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdMappingRow {
    pub user_id: String,
    pub memory_id: String,
    pub graph_node_id: Option<String>,
    pub vector_primary_id: Option<String>,
    pub entity_type: String,
}

#[derive(Clone)]
pub struct IdMappingStore {
    pool: SqlitePool,
}

impl IdMappingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        user_id: &str,
        memory_id: &str,
        graph_node_id: Option<&str>,
        vector_primary_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO id_mappings (user_id, memory_id, graph_node_id, vector_primary_id, entity_type)
            VALUES (?, ?, ?, ?, 'memory')
            ON CONFLICT(user_id, memory_id) DO UPDATE SET
                graph_node_id = COALESCE(excluded.graph_node_id, id_mappings.graph_node_id),
                vector_primary_id = COALESCE(excluded.vector_primary_id, id_mappings.vector_primary_id)
            "#,
        )
        .bind(user_id)
        .bind(memory_id)
        .bind(graph_node_id)
        .bind(vector_primary_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str, memory_id: &str) -> Result<Option<IdMappingRow>> {
        let row = sqlx::query_as::<_, IdMappingRow>(
            "SELECT * FROM id_mappings WHERE user_id = ? AND memory_id = ?",
        )
        .bind(user_id)
        .bind(memory_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Deterministic vector primary_id derived from (user_id, memory_id),
    /// used so vector upserts are idempotent on repeat (§4.7).
    pub fn derive_vector_primary_id(user_id: &str, memory_id: &str) -> String {
        crate::utils::sha256_hash(&format!("{user_id}:{memory_id}"))
    }
}

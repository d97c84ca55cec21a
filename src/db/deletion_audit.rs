// src/db/deletion_audit.rs
// DeletionAudit DAO (C1), grounded on the same SHA-256 canonical-snapshot
// pattern used elsewhere in this codebase for verifiable audit trails.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AffectedRecords {
    pub memory_ids: Vec<String>,
    pub graph_node_ids: Vec<String>,
    pub vector_primary_ids: Vec<String>,
}

#[derive(Clone)]
pub struct DeletionAuditStore {
    pool: SqlitePool,
}

impl DeletionAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Canonical JSON form: stable key order via explicit struct field order
    /// and sorted id lists, so the hash is reproducible regardless of the
    /// order ids were collected in.
    pub fn canonical_hash(records: &AffectedRecords) -> Result<String> {
        let mut records = records.clone();
        records.memory_ids.sort();
        records.graph_node_ids.sort();
        records.vector_primary_ids.sort();
        let canonical = serde_json::to_string(&records)?;
        Ok(crate::utils::sha256_hash(&canonical))
    }

    pub async fn create(
        &self,
        user_id: &str,
        deletion_type: &str,
        records: &AffectedRecords,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let hash = Self::canonical_hash(records)?;
        sqlx::query(
            r#"
            INSERT INTO deletion_audits (id, user_id, deletion_type, affected_records,
                requested_at, audit_hash, status)
            VALUES (?, ?, ?, ?, ?, ?, 'pending')
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(deletion_type)
        .bind(serde_json::to_string(records)?)
        .bind(Utc::now().to_rfc3339())
        .bind(&hash)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn mark_completed(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE deletion_audits SET status = 'completed', completed_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn verify(&self, id: &str) -> Result<bool> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT affected_records, audit_hash FROM deletion_audits WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((records_json, stored_hash)) => {
                let records: AffectedRecords = serde_json::from_str(&records_json)?;
                let recomputed = Self::canonical_hash(&records)?;
                Ok(recomputed == stored_hash)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_hash_is_order_independent() {
        let a = AffectedRecords {
            memory_ids: vec!["m2".into(), "m1".into()],
            graph_node_ids: vec![],
            vector_primary_ids: vec![],
        };
        let b = AffectedRecords {
            memory_ids: vec!["m1".into(), "m2".into()],
            graph_node_ids: vec![],
            vector_primary_ids: vec![],
        };
        assert_eq!(
            DeletionAuditStore::canonical_hash(&a).unwrap(),
            DeletionAuditStore::canonical_hash(&b).unwrap()
        );
    }
}

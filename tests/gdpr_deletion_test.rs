// tests/gdpr_deletion_test.rs
// GDPR erasure flow (§4.12, S5): soft-delete, id-mapping resolution, and a
// verifiable audit hash over exactly the records that were touched.

use relmem::db::deletion_audit::{AffectedRecords, DeletionAuditStore};
use relmem::db::id_mapping::IdMappingStore;
use relmem::db::memories::MemoryStore;
use relmem::db::outbox::OutboxStore;
use sqlx::SqlitePool;

async fn pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    relmem::db::init_schema(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn erasure_soft_deletes_and_produces_a_verifiable_audit() {
    let pool = pool().await;
    let memories = MemoryStore::new(pool.clone());
    let id_mapping = IdMappingStore::new(pool.clone());
    let outbox = OutboxStore::new(pool.clone());
    let audits = DeletionAuditStore::new(pool.clone());

    let mut tx = pool.begin().await.unwrap();
    let memory_id = MemoryStore::insert_pending_tx(&mut tx, "u1", "I live in Toronto", 0.0, chrono::Utc::now())
        .await
        .unwrap();
    tx.commit().await.unwrap();
    memories.mark_committed(&memory_id).await.unwrap();

    id_mapping
        .upsert("u1", &memory_id, Some("entity-toronto"), Some("vec-primary-1"))
        .await
        .unwrap();

    // Mirror the delete_memories handler: soft-delete, resolve mappings,
    // enqueue a delete event per memory, then audit what was touched.
    memories.soft_delete(&memory_id).await.unwrap();
    let mapping = id_mapping.get("u1", &memory_id).await.unwrap().unwrap();
    outbox.insert_delete_event(&memory_id, "u1").await.unwrap();

    let records = AffectedRecords {
        memory_ids: vec![memory_id.clone()],
        graph_node_ids: mapping.graph_node_id.into_iter().collect(),
        vector_primary_ids: mapping.vector_primary_id.into_iter().collect(),
    };
    let audit_id = audits.create("u1", "gdpr_erasure", &records).await.unwrap();
    audits.mark_completed(&audit_id).await.unwrap();

    let status = memories.status(&memory_id).await.unwrap().unwrap();
    assert_eq!(status, relmem::db::types::MemoryStatus::Deleted);
    assert!(audits.verify(&audit_id).await.unwrap(), "audit hash should verify against stored records");

    let backlog = outbox.backlog_depth().await.unwrap();
    assert_eq!(backlog, 1, "the delete event should be queued for the worker");
}

#[tokio::test]
async fn audit_fails_to_verify_if_records_are_tampered_with() {
    let pool = pool().await;
    let audits = DeletionAuditStore::new(pool.clone());

    let records = AffectedRecords {
        memory_ids: vec!["m1".into()],
        graph_node_ids: vec![],
        vector_primary_ids: vec![],
    };
    let audit_id = audits.create("u1", "gdpr_erasure", &records).await.unwrap();
    assert!(audits.verify(&audit_id).await.unwrap());

    sqlx::query("UPDATE deletion_audits SET affected_records = ? WHERE id = ?")
        .bind(serde_json::to_string(&AffectedRecords {
            memory_ids: vec!["m1".into(), "m2".into()],
            graph_node_ids: vec![],
            vector_primary_ids: vec![],
        }).unwrap())
        .bind(&audit_id)
        .execute(&pool)
        .await
        .unwrap();

    assert!(!audits.verify(&audit_id).await.unwrap(), "tampered record set should fail verification");
}

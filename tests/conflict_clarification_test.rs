// tests/conflict_clarification_test.rs
// Conflict detection + clarification lifecycle end to end (§4.9), over a
// real in-memory SQLite schema rather than the pure unit-level checks in
// conflict::tests.

use chrono::Utc;
use relmem::conflict::ConflictService;
use relmem::db::clarifications::ClarificationStore;
use relmem::db::conflicts::ConflictStore;
use relmem::db::memories::MemoryStore;
use relmem::db::types::{ConflictStatus, Memory, MemoryStatus};
use sqlx::SqlitePool;

async fn pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    relmem::db::init_schema(&pool).await.unwrap();
    pool
}

async fn insert_memory(pool: &SqlitePool, id: &str, user_id: &str, content: &str) {
    let mut tx = pool.begin().await.unwrap();
    sqlx::query(
        r#"
        INSERT INTO memories (id, user_id, content, embedding, valence, status,
            conflict_status, observed_at, created_at, committed_at, metadata)
        VALUES (?, ?, ?, NULL, 0.0, 'committed', 'active', ?, ?, ?, '{}')
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(content)
    .bind(Utc::now().to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

fn memory(id: &str, user_id: &str, content: &str) -> Memory {
    Memory {
        id: id.to_string(),
        user_id: user_id.to_string(),
        content: content.to_string(),
        embedding: None,
        valence: 0.0,
        status: MemoryStatus::Committed,
        conflict_status: ConflictStatus::Active,
        observed_at: Utc::now(),
        created_at: Utc::now(),
        committed_at: None,
        metadata: serde_json::json!({}),
    }
}

#[tokio::test]
async fn contradiction_raises_clarification_and_confirming_keeps_the_newer_memory() {
    let pool = pool().await;
    insert_memory(&pool, "m1", "u1", "I like spicy hotpot food").await;
    insert_memory(&pool, "m2", "u1", "I dislike spicy hotpot food now").await;

    let service = ConflictService::new(
        ConflictStore::new(pool.clone()),
        ClarificationStore::new(pool.clone()),
        MemoryStore::new(pool.clone()),
        0.8,
        3,
        1,
    );

    let recent = vec![memory("m1", "u1", "I like spicy hotpot food")];
    let candidate = memory("m2", "u1", "I dislike spicy hotpot food now");

    let detected = service.detect(&candidate, &recent).expect("expected a conflict");
    assert_eq!(detected.memory_1_id, "m1");
    assert_eq!(detected.memory_2_id, "m2");

    let conflict_id = service
        .record_conflict("u1", &detected)
        .await
        .unwrap()
        .expect("first sighting should persist a new conflict row");

    // Re-detecting the same unordered pair must not create a second row.
    let again = service.record_conflict("u1", &detected).await.unwrap();
    assert!(again.is_none(), "duplicate conflict pair should not be re-recorded");

    let clarification_id = service
        .start_clarification("u1", &conflict_id, "session-1", "which one is right?")
        .await
        .unwrap()
        .expect("rate limit should allow the first clarification this hour");

    // Rate limit: a second clarification within the hour is refused.
    let second = service
        .record_conflict("u1", &detected)
        .await
        .unwrap();
    assert!(second.is_none());

    let pending = service
        .pending_clarification("u1", "session-1")
        .await
        .unwrap()
        .expect("clarification should be pending");
    assert_eq!(pending.id, clarification_id);

    // User confirms the newer memory (m2) is correct.
    service
        .resolve_with_response(&pending, "yes that's right", "m2")
        .await
        .unwrap();

    let conflict = service.get_conflict(&conflict_id).await.unwrap().unwrap();
    assert_eq!(conflict.status, "resolved");
    assert_eq!(conflict.preferred_memory_id.as_deref(), Some("m2"));

    let older = MemoryStore::new(pool.clone()).get("m1").await.unwrap().unwrap();
    assert_eq!(older.conflict_status, ConflictStatus::Deprecated);
}

#[tokio::test]
async fn clarification_times_out_after_configured_turns() {
    let pool = pool().await;
    insert_memory(&pool, "m1", "u2", "I love jazz music").await;
    insert_memory(&pool, "m2", "u2", "I hate jazz music these days").await;

    let service = ConflictService::new(
        ConflictStore::new(pool.clone()),
        ClarificationStore::new(pool.clone()),
        MemoryStore::new(pool.clone()),
        0.8,
        2,
        1,
    );

    let recent = vec![memory("m1", "u2", "I love jazz music")];
    let candidate = memory("m2", "u2", "I hate jazz music these days");
    let detected = service.detect(&candidate, &recent).unwrap();
    let conflict_id = service.record_conflict("u2", &detected).await.unwrap().unwrap();
    let clarification_id = service
        .start_clarification("u2", &conflict_id, "session-2", "which is it?")
        .await
        .unwrap()
        .unwrap();

    assert!(!service.bump_or_timeout(&clarification_id).await.unwrap());
    assert!(service.bump_or_timeout(&clarification_id).await.unwrap());
}

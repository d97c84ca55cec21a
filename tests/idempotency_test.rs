// tests/idempotency_test.rs
// Idempotent turn writes (§4.7, S2): the same (key, user_id) must never
// produce a second memory row, and a replay must hand back the original
// reply rather than re-running anything.

use relmem::outbox::OutboxWriter;
use sqlx::SqlitePool;

async fn pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    relmem::db::init_schema(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn replaying_the_same_idempotency_key_does_not_duplicate_the_memory() {
    let pool = pool().await;
    let writer = OutboxWriter::new(pool.clone(), 24);

    let first = writer
        .write_turn("u1", "hello there", 0.2, chrono::Utc::now(), Some("key-1"), "hash-a", "hi back", None)
        .await
        .unwrap();
    assert!(!first.replayed);

    let second = writer
        .write_turn("u1", "hello there", 0.2, chrono::Utc::now(), Some("key-1"), "hash-a", "hi back", None)
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(first.memory_id, second.memory_id);

    let (_, _, reply_text) = writer
        .find_idempotent("key-1", "u1")
        .await
        .unwrap()
        .expect("idempotency record should be retrievable");
    assert_eq!(reply_text, "hi back");

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memories WHERE user_id = 'u1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1, "a replayed write must not insert a second memory row");
}

#[tokio::test]
async fn a_different_key_for_the_same_user_writes_a_new_memory() {
    let pool = pool().await;
    let writer = OutboxWriter::new(pool.clone(), 24);

    writer
        .write_turn("u1", "first message", 0.0, chrono::Utc::now(), Some("key-a"), "h1", "reply one", None)
        .await
        .unwrap();
    writer
        .write_turn("u1", "second message", 0.0, chrono::Utc::now(), Some("key-b"), "h2", "reply two", None)
        .await
        .unwrap();

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memories WHERE user_id = 'u1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 2);
}

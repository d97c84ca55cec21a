// src/db/schema.rs
// Inline schema creation. No migrations/ directory is used: the core runs
// `init_schema` once at startup against whatever SQLite file DATABASE_URL
// names, and the same helper is reused by tests against an in-memory pool.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding TEXT,
            valence REAL NOT NULL DEFAULT 0.0,
            status TEXT NOT NULL DEFAULT 'pending',
            conflict_status TEXT NOT NULL DEFAULT 'active',
            observed_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            committed_at TEXT,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id, status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_events (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL UNIQUE,
            memory_id TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'upsert',
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            idempotency_key TEXT,
            created_at TEXT NOT NULL,
            processing_started_at TEXT,
            processed_at TEXT,
            vector_written_at TEXT,
            graph_written_at TEXT,
            bridge_written_at TEXT,
            error_message TEXT,
            retry_after TEXT,
            FOREIGN KEY(memory_id) REFERENCES memories(id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox_events(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS idempotency_keys (
            key TEXT NOT NULL,
            user_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            reply_hash TEXT NOT NULL,
            reply_text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (key, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS id_mappings (
            user_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            graph_node_id TEXT,
            vector_primary_id TEXT,
            entity_type TEXT NOT NULL DEFAULT 'memory',
            PRIMARY KEY (user_id, memory_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memory_entities (
            user_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 1.0,
            source TEXT NOT NULL DEFAULT 'extraction',
            PRIMARY KEY (user_id, memory_id, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_entities (
            entity_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            mention_count INTEGER NOT NULL DEFAULT 1,
            first_mentioned_at TEXT NOT NULL,
            last_mentioned_at TEXT NOT NULL,
            UNIQUE(user_id, normalized_name, entity_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_relations (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL,
            created_at TEXT NOT NULL,
            last_refreshed_at TEXT NOT NULL,
            UNIQUE(user_id, source_id, target_id, relation_type)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relations_source ON graph_relations(user_id, source_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS affinity_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            old_score REAL NOT NULL,
            new_score REAL NOT NULL,
            delta REAL NOT NULL,
            trigger_event TEXT NOT NULL,
            signals TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_affinity_user ON affinity_history(user_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memory_conflicts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            memory_1_id TEXT NOT NULL,
            memory_2_id TEXT NOT NULL,
            conflict_type TEXT NOT NULL,
            common_topic TEXT NOT NULL DEFAULT '[]',
            confidence REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            resolution_method TEXT,
            preferred_memory_id TEXT,
            created_at TEXT NOT NULL,
            resolved_at TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            UNIQUE(user_id, memory_1_id, memory_2_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clarification_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            conflict_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            question TEXT NOT NULL,
            user_response TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            turns_waited INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            answered_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_clarification_user ON clarification_sessions(user_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deletion_audits (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            deletion_type TEXT NOT NULL,
            affected_records TEXT NOT NULL,
            requested_at TEXT NOT NULL,
            completed_at TEXT,
            audit_hash TEXT NOT NULL,
            signature TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite pool");
    init_schema(&pool).await.expect("schema init");
    pool
}

// tests/silence_decay_test.rs
// Daily silence-decay scheduler (§4.6, S6): users who have gone quiet lose
// affinity at a capped daily rate; users who interacted today are untouched.

use relmem::affinity::AffinityService;
use relmem::db::affinity::AffinityStore;
use sqlx::SqlitePool;

async fn pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    relmem::db::init_schema(&pool).await.unwrap();
    pool
}

#[tokio::test]
async fn silent_user_decays_capped_by_the_daily_ceiling() {
    let pool = pool().await;
    let store = AffinityStore::new(pool.clone());

    let ten_days_ago = chrono::Utc::now() - chrono::Duration::days(10);
    store
        .append("u1", 0.0, 0.5, 0.5, "turn", &serde_json::json!({}))
        .await
        .unwrap();
    // Backdate the one real interaction so the user reads as long-silent.
    sqlx::query("UPDATE affinity_history SET created_at = ? WHERE user_id = 'u1'")
        .bind(ten_days_ago.to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();

    let service = AffinityService::new(store, 0.01, 0.07);
    let decayed = service.apply_silence_decay_tick().await.unwrap();
    assert_eq!(decayed, 1);

    let (score, _) = service.current("u1").await.unwrap();
    // 10 days silent * 0.01/day = 0.10, capped at 0.07.
    assert!((score - (0.5 - 0.07)).abs() < 1e-9, "expected capped decay, got score {score}");
}

#[tokio::test]
async fn user_active_today_is_not_decayed() {
    let pool = pool().await;
    let store = AffinityStore::new(pool.clone());
    store
        .append("u2", 0.0, 0.3, 0.3, "turn", &serde_json::json!({}))
        .await
        .unwrap();

    let service = AffinityService::new(store, 0.01, 0.07);
    let decayed = service.apply_silence_decay_tick().await.unwrap();
    assert_eq!(decayed, 0);

    let (score, _) = service.current("u2").await.unwrap();
    assert!((score - 0.3).abs() < 1e-9);
}

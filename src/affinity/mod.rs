// src/affinity/mod.rs
// Affinity state machine (C10): linear update rule (§4.6) plus a daily
// silence-decay scheduler. Concurrency-sensitive: two turns for the same user
// must never both read the same old_score and race to append (§5), so every
// update takes a per-user lock before touching the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::db::affinity::AffinityStore;
use crate::db::types::AffinityState;
use crate::metrics;

#[derive(Debug, Clone, Copy, Default)]
pub struct TurnSignals {
    pub user_initiated: bool,
    pub valence: f64,
    pub memory_confirmation: bool,
    pub correction: bool,
    pub silence_days: f64,
}

/// §4.6's linear update rule.
pub fn compute_delta(signals: &TurnSignals) -> f64 {
    0.01 * signals.user_initiated as i32 as f64
        + 0.005 * signals.valence.max(0.0)
        + 0.01 * signals.memory_confirmation as i32 as f64
        - 0.02 * signals.correction as i32 as f64
        - 0.01 * (signals.valence < -0.5) as i32 as f64
        - 0.005 * signals.silence_days
}

pub struct AffinityUpdate {
    pub old_score: f64,
    pub new_score: f64,
    pub state: AffinityState,
}

pub struct AffinityService {
    store: AffinityStore,
    silence_decay_per_day: f64,
    silence_decay_daily_cap: f64,
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AffinityService {
    pub fn new(store: AffinityStore, silence_decay_per_day: f64, silence_decay_daily_cap: f64) -> Self {
        Self {
            store,
            silence_decay_per_day,
            silence_decay_daily_cap,
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn current(&self, user_id: &str) -> Result<(f64, AffinityState)> {
        let score = self.store.current_score(user_id).await?;
        Ok((score, AffinityState::from_score(score)))
    }

    /// Every user with at least one affinity record, used by the scheduler
    /// tasks that need to sweep every known user (silence decay, graph decay).
    pub async fn all_user_ids(&self) -> Result<Vec<String>> {
        self.store.all_user_ids().await
    }

    /// Applies one turn's signals under the per-user lock, appends to the
    /// history ledger, and returns the resulting state.
    pub async fn apply_turn(&self, user_id: &str, signals: TurnSignals) -> Result<AffinityUpdate> {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let old_score = self.store.current_score(user_id).await?;
        let delta = compute_delta(&signals);
        let new_score = (old_score + delta).clamp(-1.0, 1.0);

        self.store
            .append(
                user_id,
                old_score,
                new_score,
                delta,
                "turn",
                &serde_json::json!({
                    "user_initiated": signals.user_initiated,
                    "valence": signals.valence,
                    "memory_confirmation": signals.memory_confirmation,
                    "correction": signals.correction,
                    "silence_days": signals.silence_days,
                }),
            )
            .await?;
        metrics::record_affinity_update("turn");

        let state = AffinityState::from_score(new_score);
        Ok(AffinityUpdate {
            old_score,
            new_score,
            state,
        })
    }

    /// Daily scheduler tick (S6): decays every user who has gone silent since
    /// their last real interaction, bounded by `silence_decay_daily_cap` per
    /// application so a long absence doesn't crater the score in one jump.
    pub async fn apply_silence_decay_tick(&self) -> Result<usize> {
        let user_ids = self.store.all_user_ids().await?;
        let mut decayed = 0usize;
        for user_id in user_ids {
            let Some(last) = self.store.last_interaction(&user_id).await? else {
                continue;
            };
            let days_silent = (chrono::Utc::now() - last).num_days();
            if days_silent < 1 {
                continue;
            }

            let lock = self.lock_for(&user_id);
            let _guard = lock.lock().await;
            let old_score = self.store.current_score(&user_id).await?;
            let decrease = (self.silence_decay_per_day * days_silent as f64).min(self.silence_decay_daily_cap);
            let new_score = (old_score - decrease).clamp(-1.0, 1.0);
            if (new_score - old_score).abs() < f64::EPSILON {
                continue;
            }
            self.store
                .append(
                    &user_id,
                    old_score,
                    new_score,
                    new_score - old_score,
                    "silence_decay",
                    &serde_json::json!({ "days_silent": days_silent }),
                )
                .await?;
            metrics::record_affinity_update("silence_decay");
            decayed += 1;
        }
        if decayed > 0 {
            info!(decayed, "applied silence decay to affinity scores");
        }
        Ok(decayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_outweighs_positive_valence() {
        let signals = TurnSignals {
            user_initiated: true,
            valence: 0.4,
            memory_confirmation: false,
            correction: true,
            silence_days: 0.0,
        };
        let delta = compute_delta(&signals);
        assert!(delta < 0.0, "expected correction penalty to dominate, got {delta}");
    }

    #[test]
    fn strong_negative_valence_applies_extra_penalty() {
        let mild = TurnSignals {
            valence: -0.3,
            ..Default::default()
        };
        let severe = TurnSignals {
            valence: -0.9,
            ..Default::default()
        };
        assert!(compute_delta(&severe) < compute_delta(&mild));
    }

    #[tokio::test]
    async fn concurrent_turns_for_the_same_user_serialize() {
        let pool = crate::db::schema::test_pool().await;
        let service = Arc::new(AffinityService::new(
            crate::db::affinity::AffinityStore::new(pool),
            0.01,
            0.07,
        ));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .apply_turn(
                        "u1",
                        TurnSignals {
                            user_initiated: true,
                            valence: 0.5,
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let (score, _) = service.current("u1").await.unwrap();
        // Each turn adds 0.01 (user_initiated) + 0.0025 (valence) = 0.0125, so
        // 20 serialized applications should land at exactly 20 * 0.0125.
        assert!((score - 0.25).abs() < 1e-9, "score drifted to {score}, lost updates under concurrency");
    }
}

// src/retrieval/scorer.rs
// Four-factor re-rank (§4.8), grounded on this codebase's composite scoring
// idiom: pure, independently-testable factor functions combined by a small
// weighted sum, rather than one large inline expression.

use chrono::{DateTime, Utc};

use crate::config::RerankWeights;

pub fn recency_score(observed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let days = (now - observed_at).num_seconds() as f64 / 86_400.0;
    (-days.max(0.0) / 30.0).exp()
}

pub fn affinity_bonus(affinity_score: f64, candidate_valence: f64) -> f64 {
    if candidate_valence > 0.0 {
        affinity_score.max(0.0)
    } else {
        0.0
    }
}

pub fn recency_boost(observed_at: DateTime<Utc>, now: DateTime<Utc>, window_days: i64, boost: f64) -> f64 {
    let days = (now - observed_at).num_seconds() as f64 / 86_400.0;
    if days <= window_days as f64 {
        boost
    } else {
        0.0
    }
}

pub struct ScoreInputs {
    pub cosine: f64,
    pub edge_weight: f64,
    pub affinity_score: f64,
    pub candidate_valence: f64,
    pub observed_at: DateTime<Utc>,
}

pub fn composite_score(
    inputs: &ScoreInputs,
    weights: &RerankWeights,
    now: DateTime<Utc>,
    recency_boost_window_days: i64,
    rerank_recency_boost: f64,
) -> f64 {
    let recency = recency_score(inputs.observed_at, now);
    let bonus = affinity_bonus(inputs.affinity_score, inputs.candidate_valence);
    let base = weights.vector * inputs.cosine
        + weights.edge * inputs.edge_weight
        + weights.affinity * bonus
        + weights.recency * recency;
    base + recency_boost(
        inputs.observed_at,
        now,
        recency_boost_window_days,
        rerank_recency_boost,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn recent_candidate_outranks_older_identical_candidate() {
        let now = Utc::now();
        let weights = RerankWeights::default();
        let recent = ScoreInputs {
            cosine: 0.8,
            edge_weight: 0.5,
            affinity_score: 0.2,
            candidate_valence: 0.5,
            observed_at: now - Duration::days(1),
        };
        let older = ScoreInputs {
            observed_at: now - Duration::days(10),
            ..ScoreInputs {
                cosine: 0.8,
                edge_weight: 0.5,
                affinity_score: 0.2,
                candidate_valence: 0.5,
                observed_at: now,
            }
        };
        let recent_score = composite_score(&recent, &weights, now, 7, 0.15);
        let older_score = composite_score(&older, &weights, now, 7, 0.15);
        assert!(recent_score > older_score);
    }

    #[test]
    fn affinity_bonus_ignored_for_negative_valence() {
        assert_eq!(affinity_bonus(0.6, -0.1), 0.0);
        assert_eq!(affinity_bonus(0.6, 0.1), 0.6);
        assert_eq!(affinity_bonus(-0.2, 0.1), 0.0);
    }
}

// src/conflict/mod.rs
// Conflict detection + clarification lifecycle (C9). Like the turn's emotion
// read, conflict detection is a lexicon-based heuristic, not an LLM call: a
// configurable list of opposite-predicate pairs plus a Jaccard check over
// each memory's topic words.

use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use crate::db::clarifications::ClarificationStore;
use crate::db::conflicts::ConflictStore;
use crate::db::memories::MemoryStore;
use crate::db::types::{ClarificationSessionRow, Memory, MemoryConflictRow};
use crate::metrics;
use crate::utils::jaccard;

/// Opposite-predicate lexicon. Empty by default in the sense that nothing
/// outside this explicit list is ever treated as contradictory — there is no
/// learned or inferred opposition.
const OPPOSITE_PREDICATES: &[(&str, &str)] = &[
    ("like", "dislike"),
    ("love", "hate"),
    ("want", "refuse"),
    ("enjoy", "hate"),
];

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "i", "you", "to", "of", "and", "it", "in", "on",
    "my", "me", "that", "this", "with", "for",
];

fn topic_words(content: &str) -> HashSet<String> {
    content
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

fn opposite_strength(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    for (x, y) in OPPOSITE_PREDICATES {
        let a_has_x = a.contains(x);
        let b_has_y = b.contains(y);
        let a_has_y = a.contains(y);
        let b_has_x = b.contains(x);
        if (a_has_x && b_has_y) || (a_has_y && b_has_x) {
            return 1.0;
        }
    }
    0.0
}

#[derive(Debug, Clone)]
pub struct ConflictCandidate {
    pub memory_1_id: String,
    pub memory_2_id: String,
    pub conflict_type: String,
    pub common_topic: Vec<String>,
    pub confidence: f64,
}

pub struct ConflictService {
    conflicts: ConflictStore,
    clarifications: ClarificationStore,
    memories: MemoryStore,
    confidence_threshold: f64,
    clarification_timeout_turns: u32,
    clarification_rate_per_hour: u32,
}

impl ConflictService {
    pub fn new(
        conflicts: ConflictStore,
        clarifications: ClarificationStore,
        memories: MemoryStore,
        confidence_threshold: f64,
        clarification_timeout_turns: u32,
        clarification_rate_per_hour: u32,
    ) -> Self {
        Self {
            conflicts,
            clarifications,
            memories,
            confidence_threshold,
            clarification_timeout_turns,
            clarification_rate_per_hour,
        }
    }

    /// Scans `candidate` against `recent` for the first pairing whose
    /// confidence clears the threshold (§4.9). Returns at most one candidate
    /// per call — a turn raises at most one clarification.
    pub fn detect(&self, candidate: &Memory, recent: &[Memory]) -> Option<ConflictCandidate> {
        let candidate_topics = topic_words(&candidate.content);
        let mut best: Option<ConflictCandidate> = None;

        for other in recent {
            if other.id == candidate.id {
                continue;
            }
            let other_topics = topic_words(&other.content);
            let topic_overlap = jaccard(&candidate_topics, &other_topics);
            if topic_overlap < 0.5 {
                continue;
            }
            let opposite = opposite_strength(&candidate.content, &other.content);
            let confidence = 0.5 + 0.25 * opposite + 0.25 * topic_overlap;
            if confidence < self.confidence_threshold {
                continue;
            }
            let common: Vec<String> = candidate_topics.intersection(&other_topics).cloned().collect();
            let is_better = best.as_ref().map(|b| confidence > b.confidence).unwrap_or(true);
            if is_better {
                best = Some(ConflictCandidate {
                    memory_1_id: other.id.clone(),
                    memory_2_id: candidate.id.clone(),
                    conflict_type: "opposite_predicate".to_string(),
                    common_topic: common,
                    confidence,
                });
            }
        }
        best
    }

    /// Persists a detected conflict unless the unordered pair already has
    /// one on record (§4.9 — conflicts are not re-raised every turn).
    pub async fn record_conflict(&self, user_id: &str, candidate: &ConflictCandidate) -> Result<Option<String>> {
        if self
            .conflicts
            .find_pair(user_id, &candidate.memory_1_id, &candidate.memory_2_id)
            .await?
            .is_some()
        {
            return Ok(None);
        }
        let id = self
            .conflicts
            .insert(
                user_id,
                &candidate.memory_1_id,
                &candidate.memory_2_id,
                &candidate.conflict_type,
                &candidate.common_topic,
                candidate.confidence,
            )
            .await?;
        metrics::record_conflict_detected();
        info!(conflict_id = %id, confidence = candidate.confidence, "memory conflict detected");
        Ok(Some(id))
    }

    pub async fn get_conflict(&self, id: &str) -> Result<Option<MemoryConflictRow>> {
        self.conflicts.get(id).await
    }

    /// Starts a clarification for `conflict_id` if the per-user rate limit
    /// (§9 `clarification_rate_per_hour`, 1 by default) allows it.
    pub async fn start_clarification(
        &self,
        user_id: &str,
        conflict_id: &str,
        session_id: &str,
        question: &str,
    ) -> Result<Option<String>> {
        if !self
            .clarifications
            .can_start_new(user_id, self.clarification_rate_per_hour)
            .await?
        {
            return Ok(None);
        }
        let id = self
            .clarifications
            .create(user_id, conflict_id, session_id, question)
            .await?;
        Ok(Some(id))
    }

    pub async fn pending_clarification(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ClarificationSessionRow>> {
        self.clarifications.pending_for_session(user_id, session_id).await
    }

    /// The user's reply to an outstanding clarification resolves the
    /// conflict: the *referenced* memory is kept, the other is deprecated.
    pub async fn resolve_with_response(
        &self,
        clarification: &ClarificationSessionRow,
        response: &str,
        preferred_memory_id: &str,
    ) -> Result<()> {
        self.clarifications.answer(&clarification.id, response).await?;

        let conflict = self.conflicts.get(&clarification.conflict_id).await?;
        if let Some(conflict) = conflict {
            let other_id = if conflict.memory_1_id == preferred_memory_id {
                conflict.memory_2_id.clone()
            } else {
                conflict.memory_1_id.clone()
            };
            self.conflicts
                .resolve(&conflict.id, preferred_memory_id, "user_clarified")
                .await?;
            self.memories.mark_deprecated(&other_id).await?;
        }
        Ok(())
    }

    /// Advances the turn counter on a pending clarification; times it out if
    /// it has gone unanswered past the configured limit (§4.9).
    pub async fn bump_or_timeout(&self, clarification_id: &str) -> Result<bool> {
        let turns = self.clarifications.bump_turn(clarification_id).await?;
        if turns as u32 >= self.clarification_timeout_turns {
            self.clarifications.timeout(clarification_id).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn memory(id: &str, content: &str) -> Memory {
        Memory {
            id: id.to_string(),
            user_id: "u1".to_string(),
            content: content.to_string(),
            embedding: None,
            valence: 0.0,
            status: crate::db::types::MemoryStatus::Committed,
            conflict_status: crate::db::types::ConflictStatus::Active,
            observed_at: Utc::now(),
            created_at: Utc::now(),
            committed_at: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn opposite_predicate_on_shared_topic_is_detected() {
        let candidate = memory("m2", "I dislike spicy hotpot food now");
        let recent = vec![memory("m1", "I like spicy hotpot food")];
        let opposite = opposite_strength(&candidate.content, &recent[0].content);
        assert_eq!(opposite, 1.0);
        let overlap = jaccard(&topic_words(&candidate.content), &topic_words(&recent[0].content));
        assert!(overlap >= 0.5, "expected high topic overlap, got {overlap}");
    }

    #[test]
    fn unrelated_memories_have_no_conflict() {
        let a = topic_words("I like spicy hotpot food");
        let b = topic_words("the weather in Shenyang was cold yesterday");
        assert!(jaccard(&a, &b) < 0.5);
    }
}

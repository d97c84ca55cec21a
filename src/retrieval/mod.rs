// src/retrieval/mod.rs
// Retrieval service (C8): vector search -> graph expand -> fused re-rank ->
// entity-fact lookup, grounded on this codebase's parallel recent+semantic
// retrieval and composite-scoring idiom (hybrid search + composite scorer).

pub mod scorer;

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::warn;

use crate::config::AlgoConfig;
use crate::db::bridge::BridgeStore;
use crate::db::memories::MemoryStore;
use crate::db::types::Memory;
use crate::embedding::SharedEmbeddingClient;
use crate::graph::{Fact, SharedGraphStore};
use crate::vector::SharedVectorStore;

use scorer::{composite_score, ScoreInputs};

#[derive(Debug, Clone)]
pub struct RetrievedFact {
    pub source_name: String,
    pub relation_type: String,
    pub target_name: String,
    pub weight: f64,
    pub conflict_hint: bool,
}

pub struct RetrievalResult {
    pub memories: Vec<Memory>,
    pub facts: Vec<RetrievedFact>,
}

pub struct RetrievalService {
    vector: SharedVectorStore,
    graph: SharedGraphStore,
    bridge: BridgeStore,
    memories: MemoryStore,
    embedding: SharedEmbeddingClient,
    config: AlgoConfig,
}

impl RetrievalService {
    pub fn new(
        vector: SharedVectorStore,
        graph: SharedGraphStore,
        bridge: BridgeStore,
        memories: MemoryStore,
        embedding: SharedEmbeddingClient,
        config: AlgoConfig,
    ) -> Self {
        Self {
            vector,
            graph,
            bridge,
            memories,
            embedding,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        user_id: &str,
        query_text: &str,
        top_k: usize,
        affinity_score: f64,
    ) -> Result<RetrievalResult> {
        let top_k = top_k.clamp(self.config.top_k_min, self.config.top_k_max);

        let qv = self
            .embedding
            .encode(query_text)
            .await
            .map_err(|e| anyhow::anyhow!("embedding encode failed: {e}"))?;

        let search_k = (5 * top_k).max(50);
        let hits = self.vector.search(user_id, &qv, search_k).await.unwrap_or_else(|e| {
            warn!(error = %e, "vector search degraded to empty result");
            Vec::new()
        });
        let hits: Vec<_> = hits
            .into_iter()
            .filter(|h| h.score as f64 >= self.config.vector_score_threshold)
            .collect();

        let memory_ids: Vec<String> = hits.iter().map(|h| h.memory_id.clone()).collect();
        // Only still-active memories are eligible — deleted and deprecated
        // rows must never resurface through retrieval (§4.9 property 9).
        let mut candidates = Vec::new();
        for id in &memory_ids {
            if let Ok(Some(memory)) = self.memories.get_active(id).await {
                candidates.push(memory);
            }
        }

        let entities_by_memory = self
            .bridge
            .entities_by_memory(user_id, &memory_ids)
            .await
            .unwrap_or_default();
        let seed_entities: Vec<String> = entities_by_memory
            .values()
            .flatten()
            .cloned()
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();

        let facts = self.expand_with_degrade(&seed_entities, user_id, query_text).await;

        let now = Utc::now();
        let weights = self.config.rerank_weights;
        let mut scored: Vec<(f64, Memory)> = candidates
            .into_iter()
            .map(|memory| {
                let cosine = hits
                    .iter()
                    .find(|h| h.memory_id == memory.id)
                    .map(|h| h.score as f64)
                    .unwrap_or(0.0);
                // Per-candidate edge weight: the strongest fact touching an
                // entity this specific memory links to, not a global max
                // over every expanded fact (§4.8).
                let edge_weight = entities_by_memory
                    .get(&memory.id)
                    .map(|entities| {
                        facts
                            .iter()
                            .filter(|f| entities.contains(&f.source_id) || entities.contains(&f.target_id))
                            .map(|f| f.weight)
                            .fold(0.0_f64, f64::max)
                    })
                    .unwrap_or(0.0);
                let score = composite_score(
                    &ScoreInputs {
                        cosine,
                        edge_weight,
                        affinity_score,
                        candidate_valence: memory.valence,
                        observed_at: memory.observed_at,
                    },
                    &weights,
                    now,
                    self.config.recency_boost_window_days,
                    self.config.rerank_recency_boost,
                );
                (score, memory)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        let memories = scored.into_iter().map(|(_, m)| m).collect();

        let retrieved_facts = annotate_conflicts(facts, self.config.max_facts);

        Ok(RetrievalResult {
            memories,
            facts: retrieved_facts,
        })
    }

    /// Graph expansion with max_hops=2, degrading to 1 if the call exceeds
    /// the latency budget (§4.8 step 3).
    async fn expand_with_degrade(
        &self,
        seed_entities: &[String],
        user_id: &str,
        query_text: &str,
    ) -> Vec<Fact> {
        let budget = Duration::from_millis(200);
        let facts = match tokio::time::timeout(
            budget,
            self.graph.expand(seed_entities, user_id, 2),
        )
        .await
        {
            Ok(Ok(facts)) => facts,
            Ok(Err(e)) => {
                warn!(error = %e, "graph expand failed, returning empty");
                Vec::new()
            }
            Err(_) => {
                warn!("graph expand exceeded latency budget, degrading to 1 hop");
                self.graph
                    .expand(seed_entities, user_id, 1)
                    .await
                    .unwrap_or_default()
            }
        };

        if facts.is_empty() {
            if let Some(relation_type) = infer_relation_type(query_text) {
                return self
                    .graph
                    .semantic_fallback(user_id, &relation_type)
                    .await
                    .unwrap_or_default();
            }
        }
        facts
    }
}

/// Very small concept+intent heuristic: maps a handful of intent verbs to
/// relation types the graph actually stores, used only when direct seed
/// lookup finds nothing at all.
fn infer_relation_type(query_text: &str) -> Option<String> {
    let lower = query_text.to_lowercase();
    if lower.contains("live") || lower.contains("lives") || lower.contains("住") {
        Some("lives_in".to_string())
    } else if lower.contains("like") || lower.contains("喜欢") {
        Some("likes".to_string())
    } else {
        None
    }
}

const OPPOSITE_PREDICATES: &[(&str, &str)] = &[("likes", "dislikes"), ("loves", "hates")];

fn are_opposite(a: &str, b: &str) -> bool {
    OPPOSITE_PREDICATES
        .iter()
        .any(|(x, y)| (x == &a && y == &b) || (x == &b && y == &a))
}

fn annotate_conflicts(facts: Vec<Fact>, max_facts: usize) -> Vec<RetrievedFact> {
    let mut out: Vec<RetrievedFact> = facts
        .iter()
        .map(|f| RetrievedFact {
            source_name: f.source_name.clone(),
            relation_type: f.relation_type.clone(),
            target_name: f.target_name.clone(),
            weight: f.weight,
            conflict_hint: false,
        })
        .collect();

    for i in 0..facts.len() {
        for j in (i + 1)..facts.len() {
            if facts[i].target_id == facts[j].target_id
                && are_opposite(&facts[i].relation_type, &facts[j].relation_type)
            {
                out[i].conflict_hint = true;
                out[j].conflict_hint = true;
            }
        }
    }

    out.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    out.dedup_by(|a, b| {
        a.source_name == b.source_name && a.target_name == b.target_name && a.relation_type == b.relation_type
    });
    out.truncate(max_facts);
    out
}

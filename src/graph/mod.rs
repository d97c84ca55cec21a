// src/graph/mod.rs
// Graph store adapter (C2). No graph-database client exists in this
// codebase's dependency stack, so entities/relations are projected onto
// relational tables behind the same trait shape the spec requires, using the
// check-then-upsert idiom this codebase already uses for per-user learned
// state (see relationship storage for the nearest analog).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::types::{GraphEntityRow, GraphRelationRow};

#[derive(Debug, Clone)]
pub struct Fact {
    pub source_id: String,
    pub source_name: String,
    pub relation_type: String,
    pub target_id: String,
    pub target_name: String,
    pub weight: f64,
    pub hop_distance: u8,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_type: &str,
    ) -> Result<String>;

    async fn upsert_relation(
        &self,
        user_id: &str,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
        weight_bump: f64,
    ) -> Result<()>;

    async fn apply_time_decay(&self, user_id: &str, half_life_days: f64, floor: f64) -> Result<usize>;

    async fn expand(
        &self,
        seed_entities: &[String],
        user_id: &str,
        max_hops: u8,
    ) -> Result<Vec<Fact>>;

    /// When seed lookup yields nothing but the query carries a concept token
    /// and an intent verb, fall back to all relations of the inferred type.
    async fn semantic_fallback(
        &self,
        user_id: &str,
        relation_type: &str,
    ) -> Result<Vec<Fact>>;

    async fn nodes_and_edges(
        &self,
        user_id: &str,
        days: Option<i64>,
    ) -> Result<(Vec<GraphEntityRow>, Vec<GraphRelationRow>)>;

    async fn delete_entity(&self, user_id: &str, entity_id: &str) -> Result<()>;
}

pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    /// Idempotent on (user_id, normalized_name, entity_type): create, or
    /// increment mention_count and bump last_mentioned_at.
    async fn upsert_entity(&self, user_id: &str, name: &str, entity_type: &str) -> Result<String> {
        let normalized = normalize(name);
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT entity_id FROM graph_entities WHERE user_id = ? AND normalized_name = ? AND entity_type = ?",
        )
        .bind(user_id)
        .bind(&normalized)
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await?;

        let now = Utc::now().to_rfc3339();
        if let Some((entity_id,)) = existing {
            sqlx::query(
                "UPDATE graph_entities SET mention_count = mention_count + 1, last_mentioned_at = ? WHERE entity_id = ?",
            )
            .bind(&now)
            .bind(&entity_id)
            .execute(&self.pool)
            .await?;
            debug!(entity_id, "bumped existing graph entity");
            return Ok(entity_id);
        }

        let entity_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO graph_entities (entity_id, user_id, name, normalized_name, entity_type,
                mention_count, first_mentioned_at, last_mentioned_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&entity_id)
        .bind(user_id)
        .bind(name)
        .bind(&normalized)
        .bind(entity_type)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(entity_id)
    }

    /// If the edge exists, new_weight = min(1.0, current + bump); else
    /// created with the bump as the initial weight.
    async fn upsert_relation(
        &self,
        user_id: &str,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
        weight_bump: f64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let existing: Option<(String, f64)> = sqlx::query_as(
            "SELECT id, weight FROM graph_relations WHERE user_id = ? AND source_id = ? AND target_id = ? AND relation_type = ?",
        )
        .bind(user_id)
        .bind(source_id)
        .bind(target_id)
        .bind(relation_type)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id, weight)) = existing {
            let new_weight = (weight + weight_bump).min(1.0);
            sqlx::query(
                "UPDATE graph_relations SET weight = ?, last_refreshed_at = ? WHERE id = ?",
            )
            .bind(new_weight)
            .bind(&now)
            .bind(&id)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO graph_relations (id, user_id, source_id, target_id, relation_type, weight, created_at, last_refreshed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(source_id)
        .bind(target_id)
        .bind(relation_type)
        .bind(weight_bump.min(1.0))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// new_weight = current_weight * 2^(-Δt/half_life); edges below `floor`
    /// are pruned (§4.2, tested to 1e-6 per §8 property 2).
    async fn apply_time_decay(&self, user_id: &str, half_life_days: f64, floor: f64) -> Result<usize> {
        let rows = sqlx::query_as::<_, GraphRelationRow>(
            "SELECT * FROM graph_relations WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut pruned = 0usize;
        for row in rows {
            let last_refreshed = crate::db::types::parse_ts(&row.last_refreshed_at);
            let delta_days = (now - last_refreshed).num_seconds() as f64 / 86_400.0;
            let new_weight = decay_weight(row.weight, delta_days, half_life_days);
            if new_weight < floor {
                sqlx::query("DELETE FROM graph_relations WHERE id = ?")
                    .bind(&row.id)
                    .execute(&self.pool)
                    .await?;
                pruned += 1;
            } else {
                sqlx::query("UPDATE graph_relations SET weight = ? WHERE id = ?")
                    .bind(new_weight)
                    .bind(&row.id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        if pruned > 0 {
            warn!(user_id, pruned, "pruned decayed graph edges below floor");
        }
        Ok(pruned)
    }

    /// Returns triples reachable within `max_hops`, tie-broken by higher
    /// weight, then lower hop distance, then more recent last_refreshed_at.
    async fn expand(
        &self,
        seed_entities: &[String],
        user_id: &str,
        max_hops: u8,
    ) -> Result<Vec<Fact>> {
        if seed_entities.is_empty() {
            return Ok(Vec::new());
        }
        let max_hops = max_hops.clamp(1, 3);
        let mut frontier: Vec<String> = seed_entities.to_vec();
        let mut visited: std::collections::HashSet<String> =
            seed_entities.iter().cloned().collect();
        let mut facts: Vec<Fact> = Vec::new();

        for hop in 1..=max_hops {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();
            for entity_id in &frontier {
                let relations = sqlx::query_as::<_, GraphRelationRow>(
                    "SELECT * FROM graph_relations WHERE user_id = ? AND (source_id = ? OR target_id = ?)",
                )
                .bind(user_id)
                .bind(entity_id)
                .bind(entity_id)
                .fetch_all(&self.pool)
                .await?;

                for rel in relations {
                    let other = if &rel.source_id == entity_id {
                        &rel.target_id
                    } else {
                        &rel.source_id
                    };
                    if !visited.contains(other) {
                        next_frontier.push(other.clone());
                        visited.insert(other.clone());
                    }
                    let (source_name, target_name) = self
                        .names_for(user_id, &rel.source_id, &rel.target_id)
                        .await?;
                    facts.push(Fact {
                        source_id: rel.source_id.clone(),
                        source_name,
                        relation_type: rel.relation_type.clone(),
                        target_id: rel.target_id.clone(),
                        target_name,
                        weight: rel.weight,
                        hop_distance: hop,
                    });
                }
            }
            frontier = next_frontier;
        }

        facts.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.hop_distance.cmp(&b.hop_distance))
        });
        facts.dedup_by(|a, b| {
            a.source_id == b.source_id && a.target_id == b.target_id && a.relation_type == b.relation_type
        });
        Ok(facts)
    }

    async fn semantic_fallback(&self, user_id: &str, relation_type: &str) -> Result<Vec<Fact>> {
        let relations = sqlx::query_as::<_, GraphRelationRow>(
            "SELECT * FROM graph_relations WHERE user_id = ? AND relation_type = ? ORDER BY weight DESC",
        )
        .bind(user_id)
        .bind(relation_type)
        .fetch_all(&self.pool)
        .await?;

        let mut facts = Vec::with_capacity(relations.len());
        for rel in relations {
            let (source_name, target_name) = self
                .names_for(user_id, &rel.source_id, &rel.target_id)
                .await?;
            facts.push(Fact {
                source_id: rel.source_id,
                source_name,
                relation_type: rel.relation_type,
                target_id: rel.target_id,
                target_name,
                weight: rel.weight,
                hop_distance: 1,
            });
        }
        Ok(facts)
    }

    async fn nodes_and_edges(
        &self,
        user_id: &str,
        days: Option<i64>,
    ) -> Result<(Vec<GraphEntityRow>, Vec<GraphRelationRow>)> {
        let nodes = sqlx::query_as::<_, GraphEntityRow>(
            "SELECT * FROM graph_entities WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let edges = if let Some(days) = days {
            let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
            sqlx::query_as::<_, GraphRelationRow>(
                "SELECT * FROM graph_relations WHERE user_id = ? AND last_refreshed_at >= ?",
            )
            .bind(user_id)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, GraphRelationRow>(
                "SELECT * FROM graph_relations WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?
        };
        Ok((nodes, edges))
    }

    async fn delete_entity(&self, user_id: &str, entity_id: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM graph_relations WHERE user_id = ? AND (source_id = ? OR target_id = ?)",
        )
        .bind(user_id)
        .bind(entity_id)
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        sqlx::query("DELETE FROM graph_entities WHERE user_id = ? AND entity_id = ?")
            .bind(user_id)
            .bind(entity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl SqliteGraphStore {
    async fn names_for(&self, user_id: &str, a: &str, b: &str) -> Result<(String, String)> {
        let name = |id: &str| async move {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT name FROM graph_entities WHERE user_id = ? AND entity_id = ?",
            )
            .bind(user_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok::<String, anyhow::Error>(row.map(|(n,)| n).unwrap_or_else(|| id.to_string()))
        };
        Ok((name(a).await?, name(b).await?))
    }
}

pub fn decay_weight(current_weight: f64, delta_days: f64, half_life_days: f64) -> f64 {
    current_weight * 2f64.powf(-delta_days / half_life_days)
}

pub type SharedGraphStore = Arc<dyn GraphStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_formula_matches_spec() {
        let w0 = 1.0;
        let half_life = 30.0;
        let w = decay_weight(w0, 30.0, half_life);
        assert!((w - 0.5).abs() <= 1e-6);
    }

    #[tokio::test]
    async fn upsert_entity_is_idempotent_on_normalized_name() {
        let pool = crate::db::schema::test_pool().await;
        let store = SqliteGraphStore::new(pool);
        let a = store.upsert_entity("u1", "Shenyang", "location").await.unwrap();
        let b = store.upsert_entity("u1", "shenyang", "location").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn relation_weight_never_exceeds_one() {
        let pool = crate::db::schema::test_pool().await;
        let store = SqliteGraphStore::new(pool);
        let a = store.upsert_entity("u1", "Alice", "person").await.unwrap();
        let b = store.upsert_entity("u1", "Bob", "person").await.unwrap();
        for _ in 0..20 {
            store.upsert_relation("u1", &a, &b, "knows", 0.3).await.unwrap();
        }
        let (_, edges) = store.nodes_and_edges("u1", None).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(edges[0].weight <= 1.0);
    }
}

// src/vector/mod.rs
// Vector store adapter (C3), grounded on this codebase's Qdrant multi-store
// idiom: one logical collection per scope, `Condition::matches` filters, and
// deterministic primary ids derived by hashing rather than trusting the
// caller to keep a numeric id space consistent.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, DeletePointsBuilder, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{info, warn};

const COLLECTION: &str = "memories";

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub primary_id: String,
    pub memory_id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        primary_id: &str,
        user_id: &str,
        vector: &[f32],
        memory_id: &str,
    ) -> Result<()>;

    async fn search(&self, user_id: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;

    async fn delete(&self, primary_ids: &[String]) -> Result<()>;

    async fn health_check(&self) -> bool;
}

pub struct QdrantVectorStore {
    client: Qdrant,
    dim: u64,
}

fn numeric_id(primary_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    primary_id.hash(&mut hasher);
    hasher.finish()
}

impl QdrantVectorStore {
    pub async fn connect(url: &str, dim: u64) -> Result<Self> {
        let client = Qdrant::from_url(url).build()?;
        let store = Self { client, dim };
        store.ensure_collection().await?;
        Ok(store)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self.client.collection_exists(COLLECTION).await?;
        if !exists {
            info!(collection = COLLECTION, "creating qdrant collection");
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(COLLECTION)
                        .vectors_config(VectorParamsBuilder::new(self.dim, Distance::Cosine)),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(
        &self,
        primary_id: &str,
        user_id: &str,
        vector: &[f32],
        memory_id: &str,
    ) -> Result<()> {
        let point = PointStruct::new(
            numeric_id(primary_id),
            vector.to_vec(),
            [
                ("primary_id", primary_id.into()),
                ("user_id", user_id.into()),
                ("memory_id", memory_id.into()),
            ],
        );
        self.client
            .upsert_points(UpsertPointsBuilder::new(COLLECTION, vec![point]))
            .await?;
        Ok(())
    }

    async fn search(&self, user_id: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let filter = Filter::must([Condition::matches("user_id", user_id.to_string())]);
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(COLLECTION, vector.to_vec(), top_k as u64)
                    .filter(filter)
                    .with_payload(true),
            )
            .await?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload;
                let primary_id = payload.get("primary_id")?.as_str()?.to_string();
                let memory_id = payload.get("memory_id")?.as_str()?.to_string();
                Some(VectorHit {
                    primary_id,
                    memory_id,
                    score: point.score,
                })
            })
            .collect();
        Ok(hits)
    }

    async fn delete(&self, primary_ids: &[String]) -> Result<()> {
        if primary_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<_> = primary_ids.iter().map(|id| numeric_id(id).into()).collect();
        self.client
            .delete_points(DeletePointsBuilder::new(COLLECTION).points(ids))
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match self.client.health_check().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "qdrant health check failed");
                false
            }
        }
    }
}

pub type SharedVectorStore = Arc<dyn VectorStore>;

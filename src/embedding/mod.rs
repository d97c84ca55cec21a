// src/embedding/mod.rs
// Embedding client (C4): a pure `encode` contract over an HTTP endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn dim(&self) -> usize;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    dim: usize,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: String, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            dim,
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .map_err(|e| EmbeddingError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EmbeddingError::Transient(format!(
                "embedding endpoint returned {}",
                resp.status()
            )));
        }

        let body: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Permanent(e.to_string()))?;

        if body.embedding.len() != self.dim {
            return Err(EmbeddingError::Permanent(format!(
                "expected dimension {}, got {}",
                self.dim,
                body.embedding.len()
            )));
        }
        Ok(body.embedding)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

pub type SharedEmbeddingClient = Arc<dyn EmbeddingClient>;

/// Deterministic mock used in tests so retrieval/rerank tests don't depend
/// on network access: hashes the text into a fixed-dim unit vector.
pub struct MockEmbeddingClient {
    pub dim: usize,
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut out = vec![0f32; self.dim];
        for (i, word) in text.split_whitespace().enumerate() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let h = hasher.finish();
            out[(h as usize + i) % self.dim] += 1.0;
        }
        let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in out.iter_mut() {
                *v /= norm;
            }
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

//! Embedding providers.
//!
//! Text-to-embedding goes through the [`Embedder`] trait; the HTTP provider
//! speaks the OpenAI-compatible `/embeddings` wire shape so any hosted or
//! local server exposing it can back the index. The hashing provider is a
//! deterministic stand-in used by tests and offline runs.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use agentstore_core::Result;

/// Embedding vector type, dimension per provider.
pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Batch form; providers that support it answer in one round trip.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Model identifier recorded alongside stored embeddings.
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

pub type SharedEmbedder = Arc<dyn Embedder>;

/// OpenAI-compatible embeddings client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
        }
    }

    /// Read provider parameters from the environment:
    /// `EMBEDDING_API_BASE`, `EMBEDDING_API_KEY`, `EMBEDDING_MODEL`,
    /// `EMBEDDING_DIMENSION`.
    pub fn from_env() -> Result<Self> {
        let api_base = std::env::var("EMBEDDING_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("EMBEDDING_API_KEY")
            .map_err(|_| anyhow!("EMBEDDING_API_KEY environment variable not set"))?;
        let model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let dimension = std::env::var("EMBEDDING_DIMENSION")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1536);
        Ok(Self::new(api_base, api_key, model, dimension))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let embeddings = self.embed_batch(&[text]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no embedding in response").into())
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding provider returned an error status")?
            .json::<EmbeddingResponse>()
            .await
            .context("malformed embedding response")?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Deterministic embedder: hashes token trigrams into a fixed-dimension
/// vector. Similar texts land near each other only insofar as they share
/// tokens, which is exactly enough for tests and offline smoke runs.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize
                % self.dimension;
            let sign = if digest[4] % 2 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(32);
        let a = embedder.embed("payment latency report").await.unwrap();
        let b = embedder.embed("payment latency report").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn shared_tokens_score_closer() {
        let embedder = HashingEmbedder::new(64);
        let q = embedder.embed("payment latency").await.unwrap();
        let near = embedder.embed("payment latency dashboard").await.unwrap();
        let far = embedder.embed("gardening calendar advice").await.unwrap();

        let dist = |a: &[f32], b: &[f32]| -> f32 {
            a.iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt()
        };
        assert!(dist(&q, &near) < dist(&q, &far));
    }

    #[tokio::test]
    async fn default_batch_preserves_order() {
        let embedder = HashingEmbedder::default();
        let batch = embedder.embed_batch(&["one", "two"]).await.unwrap();
        assert_eq!(batch[0], embedder.embed("one").await.unwrap());
        assert_eq!(batch[1], embedder.embed("two").await.unwrap());
    }
}

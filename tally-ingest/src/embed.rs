//! Embedding adapter
//!
//! The pipeline only knows the [`Embedder`] trait; the production
//! implementation posts to a configured HTTP endpoint. Embedding is
//! optional per report config and per deployment: no endpoint, no
//! vectors.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tally_common::config::EmbeddingConfig;

/// Injected embedding function: text in, vector out
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// HTTP embedding client posting `{"text": ...}` and expecting
/// `{"embedding": [...]}` back
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, url: config.url.clone() })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;

        let body: EmbedResponse = response.json().await?;
        Ok(body.embedding)
    }
}

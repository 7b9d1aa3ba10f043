//! Text embedding behind a swappable trait.
//!
//! The shipped implementation talks to an Ollama-compatible embeddings
//! endpoint (`POST /api/embeddings`, one prompt per call). Transient
//! transport failures are retried with the configured backoff before the
//! failure surfaces as an index error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Produces fixed-dimension vectors for document chunks and queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier reported in stats.
    fn model_name(&self) -> &str;

    /// Embed each text, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Index("embedding backend returned no vector".into()))
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

/// [`Embedder`] backed by an Ollama embeddings endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("failed to build embedding client: {e}")))?;
        Ok(OllamaEmbedder {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbeddingsRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| RagError::from_transport("embeddings request", e))?;

        let status = response.status();
        if !status.is_success() {
            let kind = if status.as_u16() == 429 {
                crate::error::GenerationErrorKind::RateLimited
            } else if status.is_server_error() {
                crate::error::GenerationErrorKind::Unavailable
            } else {
                crate::error::GenerationErrorKind::InvalidResponse
            };
            return Err(RagError::generation(
                kind,
                format!("embeddings endpoint returned {status}"),
            ));
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RagError::from_transport("embeddings response", e))?;
        if body.embedding.is_empty() {
            return Err(RagError::Index("embedding backend returned an empty vector".into()));
        }
        Ok(body.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let vector = self
                .retry
                .run("embed", || self.embed_once(text))
                .await
                .map_err(|e| match e {
                    RagError::Generation { kind, message } => {
                        RagError::Index(format!("embedding backend {kind}: {message}"))
                    }
                    other => other,
                })?;
            debug!(index = i, dims = vector.len(), "embedded text");
            vectors.push(vector);
        }
        Ok(vectors)
    }
}

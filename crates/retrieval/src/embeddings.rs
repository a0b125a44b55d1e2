//! Embedding provider access for the catalog index.
//!
//! `EmbeddingClient` abstracts the provider; `OpenAiEmbeddingClient` talks
//! to the OpenAI embeddings API with bounded exponential-backoff retries,
//! and `DeterministicEmbeddingClient` keeps index and retriever tests
//! fully offline.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed catalog chunks in one batch, preserving input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a retrieval query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn model(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("embedding api error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("embedding response is missing {expected} vectors, got {actual}")]
    BatchMismatch { expected: usize, actual: usize },
    #[error("embedding api key is missing")]
    MissingApiKey,
    #[error("all {attempts} embedding attempts failed: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },
}

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

#[derive(Clone, Debug)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
}

impl OpenAiEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        if config.api_key.trim().is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { client, config })
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries as usize);

        match Retry::spawn(retry_strategy, || self.embed_once(texts)).await {
            Ok(vectors) => Ok(vectors),
            Err(error) => {
                tracing::error!(
                    event_name = "retrieval.embeddings.retry_exhausted",
                    attempts = self.config.max_retries,
                    error = %error,
                    "embedding provider kept failing"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.config.max_retries,
                    last_error: error.to_string(),
                })
            }
        }
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let request = EmbeddingsRequest { model: &self.config.model, input: texts };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderErrorResponse>(&body)
                .ok()
                .and_then(|payload| payload.error)
                .map(|detail| detail.message)
                .unwrap_or(body);
            return Err(EmbeddingError::Api { code: status.as_u16(), message });
        }

        let payload: EmbeddingsResponse = response.json().await?;
        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::BatchMismatch {
                expected: texts.len(),
                actual: payload.data.len(),
            });
        }

        let mut rows = payload.data;
        rows.sort_by_key(|row| row.index);
        Ok(rows.into_iter().map(|row| row.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_with_retry(texts).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_with_retry(&batch).await?;
        vectors.pop().ok_or(EmbeddingError::BatchMismatch { expected: 1, actual: 0 })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Offline stand-in: a bag-of-words hash embedding. Texts sharing words
/// score higher than unrelated texts, which is all the index and
/// orchestrator tests need, and results are stable across runs.
#[derive(Clone, Debug)]
pub struct DeterministicEmbeddingClient {
    dimensions: usize,
}

impl DeterministicEmbeddingClient {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let slot = (hasher.finish() % self.dimensions as u64) as usize;
            vector[slot] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for DeterministicEmbeddingClient {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingClient for DeterministicEmbeddingClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }

    fn model(&self) -> &str {
        "deterministic-hash"
    }
}

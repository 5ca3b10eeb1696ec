//! HTTP client for the embedding API.
//!
//! Turns a query string into a fixed-length vector of f32 via an
//! OpenAI-compatible `/embeddings` endpoint. Errors are non-retryable at
//! this layer; the pipeline treats any failure as "skip semantic search".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EMBEDDING_TIMEOUT;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding input is empty")]
    EmptyInput,

    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("embedding protocol error: {0}")]
    Protocol(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },
}

/// Generates embeddings for query text. Implemented by
/// [`EmbeddingClient`] in production and by fakes in tests.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// The vector length every successful call returns.
    fn dimensions(&self) -> usize;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct EmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl EmbeddingClient {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        model: String,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(EMBEDDING_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            input: text,
            model: &self.model,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        let parsed: EmbeddingResponse = serde_json::from_slice(&body)
            .map_err(|e| EmbeddingError::Protocol(format!("failed to parse response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(EmbeddingError::Protocol(format!(
                "API error: {}",
                error.message
            )));
        }
        if !status.is_success() {
            return Err(EmbeddingError::Protocol(format!(
                "unexpected status code: {status}"
            )));
        }

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Protocol("no embedding data in response".to_string()))?
            .embedding;

        if embedding.len() != self.dimensions {
            return Err(EmbeddingError::Dimension {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

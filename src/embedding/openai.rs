//! OpenAI-compatible embedding provider.
//!
//! Works against any endpoint that speaks the OpenAI `/embeddings` protocol,
//! including the Volcengine Ark gateway the default models live on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// Embedding client for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedding {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: usize,
}

impl OpenAIEmbedding {
    /// Create a new embedding client.
    ///
    /// # Arguments
    /// * `api_key` - Bearer token for the endpoint
    /// * `base_url` - API root, e.g. `https://ark.cn-beijing.volces.com/api/v3`
    /// * `model` - Embedding model identifier
    /// * `timeout` - Per-request timeout
    /// * `max_retries` - Attempts for retryable failures (429, 5xx, timeouts)
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for an empty key or model.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
        max_retries: usize,
    ) -> EmbeddingResult<Self> {
        let model = model.into();
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::ConfigError("missing API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(EmbeddingError::ConfigError("missing embedding model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| EmbeddingError::ConfigError(format!("invalid API key: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            max_retries: max_retries.max(1),
        })
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn retry_backoff(attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        Duration::from_millis(500 * (1 << capped))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::MalformedResponse("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".to_string()));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        };

        let mut attempt = 0usize;
        loop {
            debug!(model = %self.model, inputs = texts.len(), attempt, "Requesting embeddings");
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = resp
                            .json()
                            .await
                            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))?;
                        return parsed.into_vectors(texts.len());
                    }

                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if Self::should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "Embedding request failed, retrying");
                        tokio::time::sleep(Self::retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::ApiError(format!("{}: {}", status, body)));
                }
                Err(err) => {
                    if (err.is_timeout() || err.is_connect()) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(error = %err, attempt, "Embedding request failed, retrying");
                        tokio::time::sleep(Self::retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(EmbeddingError::ApiError(err.to_string()));
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    encoding_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl EmbeddingResponse {
    fn into_vectors(mut self, expected: usize) -> EmbeddingResult<Vec<Vec<f32>>> {
        if self.data.len() != expected {
            return Err(EmbeddingError::MalformedResponse(format!(
                "{} embeddings returned for {} inputs",
                self.data.len(),
                expected
            )));
        }
        self.data.sort_by_key(|entry| entry.index);
        if self.data.iter().any(|entry| entry.embedding.is_empty()) {
            return Err(EmbeddingError::MalformedResponse("empty embedding vector".to_string()));
        }
        Ok(self.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

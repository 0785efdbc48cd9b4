//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for turning text into vectors and an
//! implementation backed by an OpenAI-compatible `/embeddings` endpoint.
//!
//! The retrieval layer only ever sees the trait. A failed call never aborts a
//! batch: callers treat the text as unembeddable and move on.

pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network or API communication error
    #[error("API request failed: {0}")]
    ApiError(String),

    /// The endpoint answered but the body had no usable vector
    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    /// Invalid input text (e.g., empty)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// The model is fixed when the provider is constructed; every store must be
/// queried with the model it was built with.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the provider is unreachable or the
    /// response carries no vector.
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    ///
    /// The default issues one request per text.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Identifier of the embedding model (e.g. "doubao-embedding-text-240715").
    fn model_name(&self) -> &str;
}

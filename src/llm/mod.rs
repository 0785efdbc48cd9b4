//! Text-completion collaborator.
//!
//! Keyword refinement, outline decomposition and review synthesis all talk to a
//! large language model through the same prompt-in/text-out contract.

pub mod openai;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

/// Errors returned by completion providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network or API communication error
    #[error("API request failed: {0}")]
    ApiError(String),

    /// The endpoint answered without any completion text
    #[error("Empty completion: {0}")]
    EmptyResponse(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for completion operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Anything that turns a prompt into text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send a single user prompt and return the raw completion text.
    async fn complete(&self, prompt: &str) -> LlmResult<String>;

    /// Identifier of the chat model.
    fn model_name(&self) -> &str;
}

static REASONING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("static regex"));

/// Remove `<think>...</think>` reasoning spans emitted by thinking models.
pub fn strip_reasoning(text: &str) -> String {
    REASONING_RE.replace_all(text, "").trim().to_string()
}

/// Slice from the first `{` to the last `}`, if both exist in that order.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

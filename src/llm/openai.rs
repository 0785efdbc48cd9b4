//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionProvider, LlmError, LlmResult};

/// Chat client for `{base_url}/chat/completions`.
///
/// Thinking models can take minutes per answer, so callers should pick a
/// generous timeout.
#[derive(Debug, Clone)]
pub struct OpenAIChat {
    client: Client,
    endpoint: String,
    model: String,
}

impl OpenAIChat {
    /// Create a chat client bound to one model.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> LlmResult<Self> {
        let model = model.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::ConfigError("missing API key".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| LlmError::ConfigError(format!("invalid API key: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAIChat {
    async fn complete(&self, prompt: &str) -> LlmResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(model = %self.model, prompt_chars = prompt.chars().count(), "Requesting completion");
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(LlmError::ApiError(format!("{}: {}", status, text)));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ApiError(format!("failed to parse response: {}", e)))?;
        parsed.into_content()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self) -> LlmResult<String> {
        self.choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyResponse("no message content in choices".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let chat = OpenAIChat::new("k", "https://example.com/api/v3", "chat", Duration::from_secs(5)).unwrap();
        assert_eq!(chat.endpoint, "https://example.com/api/v3/chat/completions");
        assert_eq!(chat.model_name(), "chat");
    }

    #[test]
    fn test_missing_key() {
        let result = OpenAIChat::new("", "https://example.com", "chat", Duration::from_secs(5));
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[test]
    fn test_response_content() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_content().unwrap(), "hello");
    }

    #[test]
    fn test_response_without_content() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(matches!(parsed.into_content(), Err(LlmError::EmptyResponse(_))));

        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.into_content().is_err());
    }
}

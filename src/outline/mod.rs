//! Outline decomposition.
//!
//! Splits a free-form review outline into ordered blocks, each with a title,
//! a description of what it covers and seed keywords.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::llm::{extract_json_object, strip_reasoning, CompletionProvider, LlmError};
use crate::models::OutlineBlock;

/// Errors from decomposition.
#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("Outline text is empty")]
    EmptyOutline,

    #[error("Decomposition call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Decomposition response is not a blocks object: {0}")]
    InvalidResponse(String),
}

pub type DecomposeResult<T> = Result<T, DecomposeError>;

/// The decomposed outline, persisted as `outline_decomposed.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecomposedOutline {
    #[serde(default)]
    pub blocks: Vec<OutlineBlock>,
}

/// Turns outline text into blocks.
#[async_trait]
pub trait OutlineDecomposer: Send + Sync {
    /// Decompose `outline`. Zero blocks is a valid return; callers decide
    /// whether that is fatal.
    async fn decompose(&self, outline: &str) -> DecomposeResult<DecomposedOutline>;
}

/// Decomposer backed by a chat model.
pub struct LlmOutlineDecomposer<L>
where
    L: CompletionProvider,
{
    llm: L,
}

impl<L> LlmOutlineDecomposer<L>
where
    L: CompletionProvider,
{
    pub fn new(llm: L) -> Self {
        Self { llm }
    }
}

/// Build the decomposition prompt.
pub fn build_decomposition_prompt(outline: &str) -> String {
    format!(
        r#"Split the following literature review outline into its sections. For every section give its title, a short description of what it should cover, and 3 to 6 English search keywords for finding relevant papers.

<outline>
{outline}
</outline>

Answer with JSON only, in exactly this shape:
{{
  "blocks": [
    {{"title": "", "content": "", "keywords": []}}
  ]
}}
"#,
        outline = outline.trim()
    )
}

/// Parse a decomposition response.
pub fn parse_decomposition(response: &str) -> DecomposeResult<DecomposedOutline> {
    let response = strip_reasoning(response);
    let json = extract_json_object(&response)
        .ok_or_else(|| DecomposeError::InvalidResponse("no JSON object found".to_string()))?;
    serde_json::from_str(json).map_err(|e| DecomposeError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl<L> OutlineDecomposer for LlmOutlineDecomposer<L>
where
    L: CompletionProvider,
{
    async fn decompose(&self, outline: &str) -> DecomposeResult<DecomposedOutline> {
        if outline.trim().is_empty() {
            return Err(DecomposeError::EmptyOutline);
        }
        let response = self.llm.complete(&build_decomposition_prompt(outline)).await?;
        let decomposed = parse_decomposition(&response)?;
        info!(blocks = decomposed.blocks.len(), "Outline decomposed");
        Ok(decomposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmResult;

    struct FixedLlm(&'static str);

    #[async_trait]
    impl CompletionProvider for FixedLlm {
        async fn complete(&self, _prompt: &str) -> LlmResult<String> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_parse_decomposition() {
        let response = r#"<think>{scratch}</think>Here you go:
        {"blocks": [
            {"title": "Intro", "content": "Scope", "keywords": ["a", "b"]},
            {"title": "Methods"}
        ]}"#;
        let outline = parse_decomposition(response).unwrap();
        assert_eq!(outline.blocks.len(), 2);
        assert_eq!(outline.blocks[0].keywords, vec!["a", "b"]);
        assert!(outline.blocks[1].keywords.is_empty());
    }

    #[test]
    fn test_parse_decomposition_without_json() {
        assert!(matches!(
            parse_decomposition("sorry"),
            Err(DecomposeError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_llm_decomposer() {
        let decomposer = LlmOutlineDecomposer::new(FixedLlm(r#"{"blocks": [{"title": "Only"}]}"#));
        let outline = decomposer.decompose("1. Only section").await.unwrap();
        assert_eq!(outline.blocks[0].title, "Only");

        let empty = LlmOutlineDecomposer::new(FixedLlm(r#"{"blocks": []}"#));
        assert!(empty.decompose("1. Nothing").await.unwrap().blocks.is_empty());
    }

    #[tokio::test]
    async fn test_empty_outline_is_rejected() {
        let decomposer = LlmOutlineDecomposer::new(FixedLlm("{}"));
        assert!(matches!(decomposer.decompose("  ").await, Err(DecomposeError::EmptyOutline)));
    }

    #[test]
    fn test_prompt_contains_outline() {
        assert!(build_decomposition_prompt("  1. Intro\n2. Body ").contains("<outline>\n1. Intro\n2. Body\n</outline>"));
    }
}

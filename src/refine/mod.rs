//! Keyword refinement.
//!
//! After the abstract search, the block and its best abstracts are shown to
//! the language model, which proposes English search keywords for the
//! full-text pass. Refinement is best effort: responses are parsed by an
//! ordered chain of strategies, and when every strategy fails (or the model
//! cannot be reached) the block's own keywords are used.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{extract_json_object, strip_reasoning, CompletionProvider};
use crate::models::{OutlineBlock, SearchResult};

/// Default cap on refined keywords.
pub const DEFAULT_MAX_KEYWORDS: usize = 10;

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)""#).expect("static regex"));

/// Why a strategy could not produce keywords.
#[derive(Debug, Error, PartialEq)]
pub enum KeywordParseError {
    #[error("no JSON object in response")]
    NoJsonObject,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("JSON object has no usable keywords")]
    EmptyKeywords,

    #[error("no quoted strings in response")]
    NoQuotedStrings,
}

/// One way of reading keywords out of a model response.
pub trait KeywordStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parse at most `limit` keywords, or explain why none were found.
    fn parse(&self, response: &str, limit: usize) -> Result<Vec<String>, KeywordParseError>;
}

#[derive(Deserialize)]
struct KeywordsObject {
    #[serde(default)]
    keywords: Vec<serde_json::Value>,
}

/// Reads `{"keywords": [...]}` from the first `{` to the last `}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonObjectStrategy;

impl KeywordStrategy for JsonObjectStrategy {
    fn name(&self) -> &'static str {
        "json_object"
    }

    fn parse(&self, response: &str, limit: usize) -> Result<Vec<String>, KeywordParseError> {
        let json = extract_json_object(response).ok_or(KeywordParseError::NoJsonObject)?;
        let parsed: KeywordsObject =
            serde_json::from_str(json).map_err(|e| KeywordParseError::InvalidJson(e.to_string()))?;

        let keywords: Vec<String> = parsed
            .keywords
            .into_iter()
            .filter_map(|value| match value {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => None,
            })
            .take(limit)
            .collect();

        if keywords.is_empty() {
            return Err(KeywordParseError::EmptyKeywords);
        }
        Ok(keywords)
    }
}

/// Collects every double-quoted string in the response.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuotedStringStrategy;

impl KeywordStrategy for QuotedStringStrategy {
    fn name(&self) -> &'static str {
        "quoted_strings"
    }

    fn parse(&self, response: &str, limit: usize) -> Result<Vec<String>, KeywordParseError> {
        let words: Vec<String> = QUOTED_RE
            .captures_iter(response)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|w| !w.is_empty() && w != "keywords")
            .take(limit)
            .collect();

        if words.is_empty() {
            return Err(KeywordParseError::NoQuotedStrings);
        }
        Ok(words)
    }
}

/// Build the refinement prompt for one block.
pub fn build_refinement_prompt(block: &OutlineBlock, abstract_results: &[SearchResult], limit: usize) -> String {
    let mut abstracts = String::new();
    for (i, result) in abstract_results.iter().enumerate() {
        let title = result.title().unwrap_or("Untitled");
        let abstract_text = result
            .metadata
            .get("abstract")
            .map(String::as_str)
            .filter(|a| !a.is_empty())
            .unwrap_or(result.text.as_str());
        abstracts.push_str(&format!("[Paper {}] Title: {}\nAbstract: {}\n\n", i + 1, title, abstract_text));
    }
    if abstracts.is_empty() {
        abstracts.push_str("No related abstracts were found. Derive the keywords from the outline alone.");
    }

    format!(
        r#"Your task is to read one section of a literature review outline together with abstracts of papers retrieved for it, decide what the section must cover, identify the information essential to its argument and the key technical terms, and output the keywords you would most like to search for, as JSON.

First, read the outline section:
<outline>
Title: {title}
Content: {content}
</outline>

Then read the retrieved abstracts:
<literature_abstract>
{abstracts}
</literature_abstract>

Combine the outline and the abstracts: work out the core elements of the topic and how they connect, which information the section's logic cannot do without, and which domain terms matter for understanding it.

Output at most {limit} keywords as JSON. Keywords must be in English.
{{
  "keywords": []
}}
"#,
        title = block.title,
        content = block.content,
        abstracts = abstracts.trim_end(),
        limit = limit,
    )
}

/// Turns model responses into search keywords.
pub struct KeywordRefiner {
    strategies: Vec<Box<dyn KeywordStrategy>>,
    max_keywords: usize,
}

impl Default for KeywordRefiner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYWORDS)
    }
}

impl KeywordRefiner {
    /// Refiner with the standard chain: JSON object, then quoted strings.
    pub fn new(max_keywords: usize) -> Self {
        Self {
            strategies: vec![Box::new(JsonObjectStrategy), Box::new(QuotedStringStrategy)],
            max_keywords,
        }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn KeywordStrategy>>, max_keywords: usize) -> Self {
        Self {
            strategies,
            max_keywords,
        }
    }

    /// Run the strategy chain over a raw response. `None` when all fail.
    pub fn parse_keywords(&self, response: &str) -> Option<Vec<String>> {
        let response = strip_reasoning(response);
        for strategy in &self.strategies {
            match strategy.parse(&response, self.max_keywords) {
                Ok(keywords) => {
                    info!(strategy = strategy.name(), count = keywords.len(), "Parsed refined keywords");
                    return Some(keywords);
                }
                Err(e) => warn!(strategy = strategy.name(), error = %e, "Keyword strategy failed"),
            }
        }
        None
    }

    /// Ask `llm` for refined keywords, falling back to the block's own.
    pub async fn refine<L>(&self, llm: &L, block: &OutlineBlock, abstract_results: &[SearchResult]) -> Vec<String>
    where
        L: CompletionProvider + ?Sized,
    {
        let prompt = build_refinement_prompt(block, abstract_results, self.max_keywords);
        let response = match llm.complete(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Keyword refinement call failed, using original keywords");
                return block.keywords.clone();
            }
        };

        self.parse_keywords(&response).unwrap_or_else(|| {
            warn!(keywords = ?block.keywords, "No keywords in refinement response, using original keywords");
            block.keywords.clone()
        })
    }
}

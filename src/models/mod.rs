//! Core data models for the literature retrieval system.
//!
//! This module contains the fundamental data structures shared across the
//! crate: store records, search results, outline blocks and the per-block and
//! aggregate result files written by the outline pipeline.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Free-form string metadata attached to a record (file name, title, ...).
pub type Metadata = BTreeMap<String, String>;

/// Build metadata from a JSON `metadata` object plus loose top-level fields.
///
/// Nested values win over loose fields of the same name. Non-string nested
/// values are kept as their JSON text; non-string loose fields are dropped.
pub fn fold_metadata<I>(nested: Option<serde_json::Value>, loose: I) -> Metadata
where
    I: IntoIterator<Item = (String, serde_json::Value)>,
{
    let mut metadata = Metadata::new();
    if let Some(serde_json::Value::Object(map)) = nested {
        for (key, value) in map {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            metadata.insert(key, value);
        }
    }
    for (key, value) in loose {
        if let serde_json::Value::String(s) = value {
            metadata.entry(key).or_insert(s);
        }
    }
    metadata
}

/// The embedding field of a persisted store record.
///
/// Older stores wrote the vector in different shapes. All of them are resolved
/// into a plain float sequence exactly once, when the store is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StoredEmbedding {
    /// `"embedding": [0.1, 0.2, ...]`
    Bare(Vec<f32>),

    /// `"embedding": {"vector": [...]}`
    Keyed { vector: Vec<f32> },

    /// `"embedding": {"embedding": [...]}`
    Nested { embedding: Vec<f32> },

    /// Anything else. Treated as a missing vector.
    Unrecognized(serde_json::Value),
}

impl StoredEmbedding {
    /// Resolve into a plain vector. Empty and unrecognized shapes yield `None`.
    pub fn into_vector(self) -> Option<Vec<f32>> {
        let vector = match self {
            StoredEmbedding::Bare(v) => v,
            StoredEmbedding::Keyed { vector } => vector,
            StoredEmbedding::Nested { embedding } => embedding,
            StoredEmbedding::Unrecognized(_) => return None,
        };
        if vector.is_empty() {
            None
        } else {
            Some(vector)
        }
    }
}

/// One retrievable unit of a store: an abstract or a full-text paragraph.
///
/// Records are immutable once loaded. Records without text or vector are kept
/// so that store indices stay stable; the ranker skips them.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// The passage text
    pub text: String,

    /// Raw (un-normalized) embedding vector, if one could be resolved
    pub vector: Option<Vec<f32>>,

    /// Descriptive metadata (title, abstract, file name, ...)
    pub metadata: Metadata,
}

impl EmbeddingRecord {
    /// Create a record with a resolved vector.
    pub fn new(text: impl Into<String>, vector: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            vector: Some(vector),
            metadata,
        }
    }

    /// A record is valid when it has non-empty text and a non-empty vector.
    pub fn is_valid(&self) -> bool {
        !self.text.is_empty() && self.vector.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// Relevance classification for search results.
///
/// Used by the presentation layer to bucket raw cosine scores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelevanceLevel {
    /// Extremely high similarity (cosine similarity > 0.95)
    Identical,

    /// Very high similarity (cosine similarity > 0.85)
    HighlySimilar,

    /// Moderate similarity (cosine similarity > 0.70)
    Similar,

    /// Anything that passed the search threshold
    Relevant,
}

impl RelevanceLevel {
    /// Determine relevance level from a cosine similarity score.
    pub fn from_score(score: f32) -> Self {
        if score > 0.95 {
            RelevanceLevel::Identical
        } else if score > 0.85 {
            RelevanceLevel::HighlySimilar
        } else if score > 0.70 {
            RelevanceLevel::Similar
        } else {
            RelevanceLevel::Relevant
        }
    }
}

/// A single ranked hit.
///
/// Produced by the ranker and the retrieval orchestrator; written to result
/// files but never treated as authoritative state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Position of the matched record in its store
    pub index: usize,

    /// The matched passage
    pub text: String,

    /// Cosine similarity against the query
    pub similarity: f32,

    /// Metadata copied from the matched record
    #[serde(default)]
    pub metadata: Metadata,

    /// Keyword whose search surfaced this hit (single-keyword searches)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_keyword: Option<String>,

    /// Every keyword whose search surfaced this text (after merging)
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub source_keywords: BTreeSet<String>,
}

impl SearchResult {
    /// Create an untagged search result.
    pub fn new(index: usize, text: String, similarity: f32, metadata: Metadata) -> Self {
        Self {
            index,
            text,
            similarity,
            metadata,
            source_keyword: None,
            source_keywords: BTreeSet::new(),
        }
    }

    /// Categorical relevance of this hit.
    pub fn relevance(&self) -> RelevanceLevel {
        RelevanceLevel::from_score(self.similarity)
    }

    /// Title from metadata, if the record carried one.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str).filter(|t| !t.is_empty())
    }
}

/// One structural unit of a decomposed outline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutlineBlock {
    /// Section heading
    #[serde(default)]
    pub title: String,

    /// What the section should cover
    #[serde(default)]
    pub content: String,

    /// Seed keywords for the abstract search
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Everything the pipeline learned about one block.
///
/// Serialized as `block_{n}.json` immediately after the block completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockResult {
    /// Zero-based position of the block in the outline
    pub block_index: usize,

    /// The block as produced by decomposition
    pub block_info: OutlineBlock,

    /// Keywords the block came with
    pub original_keywords: Vec<String>,

    /// Keywords after refinement (falls back to the originals)
    pub enhanced_keywords: Vec<String>,

    /// Merged hits from the abstract store
    #[serde(default)]
    pub abstract_results: Vec<SearchResult>,

    /// Merged hits from the full-text store
    #[serde(default)]
    pub fulltext_results: Vec<SearchResult>,
}

/// Summary of a whole outline run, written as `final_result.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateResult {
    /// The outline text as given by the user
    pub outline: String,

    /// Number of blocks the outline decomposed into
    pub blocks_count: usize,

    /// Results for each processed block, in block order
    pub blocks_results: Vec<BlockResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_level_from_score() {
        assert_eq!(RelevanceLevel::from_score(0.96), RelevanceLevel::Identical);
        assert_eq!(RelevanceLevel::from_score(0.90), RelevanceLevel::HighlySimilar);
        assert_eq!(RelevanceLevel::from_score(0.75), RelevanceLevel::Similar);
        assert_eq!(RelevanceLevel::from_score(0.60), RelevanceLevel::Relevant);
        assert_eq!(RelevanceLevel::from_score(0.10), RelevanceLevel::Relevant);
    }

    #[test]
    fn test_stored_embedding_shapes() {
        let bare: StoredEmbedding = serde_json::from_str("[1.0, 2.0]").unwrap();
        assert_eq!(bare.into_vector(), Some(vec![1.0, 2.0]));

        let keyed: StoredEmbedding = serde_json::from_str(r#"{"vector": [0.5]}"#).unwrap();
        assert_eq!(keyed.into_vector(), Some(vec![0.5]));

        let nested: StoredEmbedding = serde_json::from_str(r#"{"embedding": [3, 4]}"#).unwrap();
        assert_eq!(nested.into_vector(), Some(vec![3.0, 4.0]));
    }

    #[test]
    fn test_stored_embedding_unrecognized_is_absent() {
        let other: StoredEmbedding = serde_json::from_str(r#"{"values": [1.0]}"#).unwrap();
        assert_eq!(other.into_vector(), None);

        let text: StoredEmbedding = serde_json::from_str(r#""not a vector""#).unwrap();
        assert_eq!(text.into_vector(), None);

        let empty: StoredEmbedding = serde_json::from_str("[]").unwrap();
        assert_eq!(empty.into_vector(), None);
    }

    #[test]
    fn test_record_validity() {
        let good = EmbeddingRecord::new("text", vec![1.0], Metadata::new());
        assert!(good.is_valid());

        let no_text = EmbeddingRecord::new("", vec![1.0], Metadata::new());
        assert!(!no_text.is_valid());

        let no_vector = EmbeddingRecord {
            text: "text".to_string(),
            vector: None,
            metadata: Metadata::new(),
        };
        assert!(!no_vector.is_valid());
    }

    #[test]
    fn test_search_result_serialization_omits_empty_tags() {
        let result = SearchResult::new(0, "abc".to_string(), 0.5, Metadata::new());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("source_keyword").is_none());
        assert!(json.get("source_keywords").is_none());

        let mut merged = result.clone();
        merged.source_keywords.insert("k".to_string());
        let json = serde_json::to_value(&merged).unwrap();
        assert_eq!(json["source_keywords"], serde_json::json!(["k"]));
    }

    #[test]
    fn test_fold_metadata() {
        let nested = serde_json::json!({"title": "inner", "year": 2021, "tags": ["a"]});
        let loose = vec![
            ("title".to_string(), serde_json::json!("loose")),
            ("file_name".to_string(), serde_json::json!("a.xml")),
            ("pages".to_string(), serde_json::json!(12)),
        ];
        let metadata = fold_metadata(Some(nested), loose);
        assert_eq!(metadata.get("title").unwrap(), "inner");
        assert_eq!(metadata.get("year").unwrap(), "2021");
        assert_eq!(metadata.get("tags").unwrap(), "[\"a\"]");
        assert_eq!(metadata.get("file_name").unwrap(), "a.xml");
        assert!(!metadata.contains_key("pages"));
    }

    #[test]
    fn test_outline_block_defaults() {
        let block: OutlineBlock = serde_json::from_str(r#"{"title": "Intro"}"#).unwrap();
        assert_eq!(block.title, "Intro");
        assert!(block.content.is_empty());
        assert!(block.keywords.is_empty());
    }
}

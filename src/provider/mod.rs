//! Source document providers.
//!
//! Providers hand the store builder the passages to embed: abstracts produced
//! by the abstract extractor or paragraphs produced by the full-text
//! extractor. Each passage arrives as an immutable [`SourceDocument`]; nothing
//! downstream sees extractor state.
//!
//! The `SourceProvider` trait keeps the builder independent of where the
//! passages come from.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{fold_metadata, Metadata};

/// Errors that can occur when reading source documents.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Failed to read from the data source
    #[error("IO error on {}: {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the data format
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// One passage to embed, with its descriptive metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub text: String,
    pub metadata: Metadata,
}

impl SourceDocument {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// Trait for sourcing passages to embed.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch every available document.
    ///
    /// # Errors
    /// Returns `ProviderError` if the source cannot be read or parsed
    async fn fetch_documents(&self) -> ProviderResult<Vec<SourceDocument>>;

    /// Fetch at most `limit` documents.
    async fn fetch_documents_limit(&self, limit: usize) -> ProviderResult<Vec<SourceDocument>> {
        let all = self.fetch_documents().await?;
        Ok(all.into_iter().take(limit).collect())
    }

    /// Number of documents available.
    async fn count_documents(&self) -> ProviderResult<usize> {
        self.fetch_documents().await.map(|docs| docs.len())
    }

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

/// Fields that hold the passage itself and never become metadata.
const TEXT_FIELDS: [&str; 4] = ["text", "content", "combined_info", "metadata"];

fn string_field<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Interpret one extractor entry.
///
/// Paragraph entries carry `text` (or `content`). Abstract entries carry
/// `combined_info`, or `title`/`abstract` from which the passage is built.
/// An entry with none of these yields a document with empty text.
pub fn document_from_entry(mut entry: Map<String, Value>) -> SourceDocument {
    let text = string_field(&entry, "text")
        .or_else(|| string_field(&entry, "content"))
        .or_else(|| string_field(&entry, "combined_info"))
        .map(str::to_string)
        .unwrap_or_else(|| {
            let mut parts = Vec::new();
            if let Some(title) = string_field(&entry, "title") {
                parts.push(format!("Title: {}", title));
            }
            if let Some(abstract_text) = string_field(&entry, "abstract") {
                parts.push(format!("Abstract: {}", abstract_text));
            }
            parts.join("\n")
        });

    let nested = entry.remove("metadata");
    let loose = entry
        .into_iter()
        .filter(|(key, _)| !TEXT_FIELDS.contains(&key.as_str()));

    SourceDocument {
        text,
        metadata: fold_metadata(nested, loose),
    }
}

/// Provider backed by an extractor JSON file (an array of entries).
pub struct JsonFileProvider {
    path: PathBuf,
    documents: Vec<SourceDocument>,
}

impl JsonFileProvider {
    /// Read and parse `path`.
    pub async fn from_file(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ProviderError::IoError {
                path: path.clone(),
                source,
            })?;
        let documents = Self::parse(&content)?;
        info!(path = %path.display(), documents = documents.len(), "Loaded source documents");
        Ok(Self { path, documents })
    }

    /// Parse extractor JSON. Array items that are not objects are skipped.
    pub fn parse(content: &str) -> ProviderResult<Vec<SourceDocument>> {
        let items: Vec<Value> =
            serde_json::from_str(content).map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let mut documents = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(entry) => documents.push(document_from_entry(entry)),
                _ => warn!(index, "Skipping non-object source entry"),
            }
        }
        Ok(documents)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SourceProvider for JsonFileProvider {
    async fn fetch_documents(&self) -> ProviderResult<Vec<SourceDocument>> {
        Ok(self.documents.clone())
    }

    async fn count_documents(&self) -> ProviderResult<usize> {
        Ok(self.documents.len())
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

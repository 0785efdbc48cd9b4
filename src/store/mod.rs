//! Embedding store loading and persistence.
//!
//! A store is a JSON array of `{text, embedding, metadata}` objects sharing one
//! embedding model. Loading is tolerant: malformed records are kept as invalid
//! entries (so indices stay stable) and excluded later by the ranker. The only
//! observable validation output is the `total`/`valid` count in the log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{fold_metadata, EmbeddingRecord, Metadata, StoredEmbedding};

/// Errors that can occur while reading or writing a store file.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file does not exist
    #[error("Embedding store not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The store file could not be read or written
    #[error("I/O error on embedding store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file is not a JSON array
    #[error("Failed to parse embedding store {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Record shape as it appears on disk.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    text: Option<String>,

    #[serde(default)]
    embedding: Option<StoredEmbedding>,

    #[serde(default)]
    metadata: Option<Value>,

    /// Loose top-level fields written by the abstract extractor (title, abstract, ...)
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Record shape written by [`EmbeddingStore::save`].
#[derive(Debug, Serialize)]
struct PersistedRecord<'a> {
    text: &'a str,
    embedding: &'a [f32],
    metadata: &'a Metadata,
}

impl RawRecord {
    fn into_record(self) -> EmbeddingRecord {
        EmbeddingRecord {
            text: self.text.unwrap_or_default(),
            vector: self.embedding.and_then(StoredEmbedding::into_vector),
            metadata: fold_metadata(self.metadata, self.extra),
        }
    }
}

fn invalid_record() -> EmbeddingRecord {
    EmbeddingRecord {
        text: String::new(),
        vector: None,
        metadata: Metadata::new(),
    }
}

/// An ordered, in-memory collection of embedding records.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    records: Vec<EmbeddingRecord>,
}

impl EmbeddingStore {
    /// Build a store from already-resolved records.
    pub fn from_records(records: Vec<EmbeddingRecord>) -> Self {
        Self { records }
    }

    /// Load a store file.
    ///
    /// # Errors
    /// Returns `StoreError::NotFound` if the path does not exist, `Io` if it
    /// cannot be read and `Parse` if it is not a JSON array. A file holding
    /// only whitespace loads as an empty store.
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let store = Self::from_json(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            path = %path.display(),
            total = store.len(),
            valid = store.valid_count(),
            "Loaded embedding store"
        );

        Ok(store)
    }

    /// Parse a store from its JSON text.
    ///
    /// Array elements that are not record objects are kept as invalid records.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let items: Vec<Value> = serde_json::from_str(content)?;
        let records = items
            .into_iter()
            .map(|item| match serde_json::from_value::<RawRecord>(item) {
                Ok(raw) => raw.into_record(),
                Err(e) => {
                    warn!("Malformed store record will be ignored by ranking: {}", e);
                    invalid_record()
                }
            })
            .collect();

        Ok(Self { records })
    }

    /// Write the store as a JSON array with bare float embeddings.
    ///
    /// Records without a vector are not written.
    pub async fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let persisted: Vec<PersistedRecord<'_>> = self
            .records
            .iter()
            .filter_map(|record| {
                record.vector.as_deref().map(|embedding| PersistedRecord {
                    text: &record.text,
                    embedding,
                    metadata: &record.metadata,
                })
            })
            .collect();

        let json = serde_json::to_string_pretty(&persisted).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(path, json)
            .await
            .map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// All records, valid or not, in file order.
    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    /// Number of records, including invalid ones.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records at all.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with both text and a vector.
    pub fn valid_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_valid()).count()
    }

    /// Vector length of the first valid record.
    pub fn dimension(&self) -> Option<usize> {
        self.records
            .iter()
            .find(|r| r.is_valid())
            .and_then(|r| r.vector.as_ref().map(Vec::len))
    }

    /// First record whose text equals `text` exactly, with its index.
    pub fn find_by_text(&self, text: &str) -> Option<(usize, &EmbeddingRecord)> {
        self.records
            .iter()
            .enumerate()
            .find(|(_, record)| record.text == text)
    }
}

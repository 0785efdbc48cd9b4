//! Store building.
//!
//! Turns extracted passages into an embedding store file:
//!
//! ```ignore
//! use litreview_search::ingestion::StoreBuilder;
//! use litreview_search::embedding::openai::OpenAIEmbedding;
//! use litreview_search::provider::JsonFileProvider;
//!
//! let embedder = OpenAIEmbedding::new(&api_key, base_url, model, timeout, 3)?;
//! let builder = StoreBuilder::new(embedder, Some(10));
//! let provider = JsonFileProvider::from_file("abstracts.json").await?;
//! let stats = builder.build_from_provider(&provider, "embeddings/abstract_embeddings.json").await?;
//! println!("Inserted: {}, Duplicates: {}", stats.inserted, stats.duplicates_skipped);
//! ```
//!
//! The builder:
//! - Embeds passages in batches, retrying a failed batch one passage at a time
//! - Skips exact duplicate texts
//! - Counts empty or unembeddable passages as failed and keeps going

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::embedding::EmbeddingProvider;
use crate::models::EmbeddingRecord;
use crate::provider::{ProviderError, SourceDocument, SourceProvider};
use crate::store::{EmbeddingStore, StoreError};

/// Errors that can occur during store building.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Provider operation failed
    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// Writing the store failed
    #[error("Storage error: {0}")]
    StorageError(#[from] StoreError),

    /// Not a single passage could be embedded
    #[error("No embeddings were generated ({failed} of {total} passages failed)")]
    Empty { total: usize, failed: usize },
}

/// Result type for ingestion operations.
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Statistics from an ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionStats {
    /// Total number of passages processed
    pub total_processed: usize,

    /// Number of passages embedded and kept
    pub inserted: usize,

    /// Number of passages skipped as exact duplicates
    pub duplicates_skipped: usize,

    /// Number of passages that were empty or could not be embedded
    pub failed: usize,
}

impl IngestionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_inserted(&mut self) {
        self.total_processed += 1;
        self.inserted += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.total_processed += 1;
        self.duplicates_skipped += 1;
    }

    pub fn record_failed(&mut self) {
        self.total_processed += 1;
        self.failed += 1;
    }
}

/// Builds embedding stores from source documents.
pub struct StoreBuilder<E>
where
    E: EmbeddingProvider,
{
    embedding_provider: E,
    batch_size: usize,
}

impl<E> StoreBuilder<E>
where
    E: EmbeddingProvider,
{
    /// Create a builder. `batch_size` defaults to 10 texts per request.
    pub fn new(embedding_provider: E, batch_size: Option<usize>) -> Self {
        Self {
            embedding_provider,
            batch_size: batch_size.filter(|n| *n > 0).unwrap_or(DEFAULT_BATCH_SIZE),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed `documents` into records.
    ///
    /// `on_progress` is called after every batch with the running totals.
    pub async fn embed_documents<F>(
        &self,
        documents: &[SourceDocument],
        mut on_progress: F,
    ) -> (Vec<EmbeddingRecord>, IngestionStats)
    where
        F: FnMut(&IngestionStats),
    {
        let mut stats = IngestionStats::new();
        let mut records = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let total_batches = documents.len().div_ceil(self.batch_size);

        for (batch_index, chunk) in documents.chunks(self.batch_size).enumerate() {
            debug!(batch = batch_index + 1, total_batches, "Embedding batch");

            let mut to_embed: Vec<&SourceDocument> = Vec::new();
            for doc in chunk {
                let text = doc.text.trim();
                if text.is_empty() {
                    warn!("Skipping passage with empty text");
                    stats.record_failed();
                } else if !seen.insert(text) {
                    stats.record_duplicate();
                } else {
                    to_embed.push(doc);
                }
            }

            if !to_embed.is_empty() {
                let texts: Vec<&str> = to_embed.iter().map(|d| d.text.trim()).collect();
                for (doc, vector) in to_embed.iter().zip(self.embed_batch_or_each(&texts).await) {
                    match vector {
                        Some(vector) => {
                            records.push(EmbeddingRecord::new(doc.text.trim(), vector, doc.metadata.clone()));
                            stats.record_inserted();
                        }
                        None => stats.record_failed(),
                    }
                }
            }

            on_progress(&stats);
        }

        (records, stats)
    }

    /// Embed a batch in one call; if that fails, embed each text on its own.
    async fn embed_batch_or_each(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        match self.embedding_provider.embed_batch(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                return vectors
                    .into_iter()
                    .map(|v| Some(v).filter(|v| !v.is_empty()))
                    .collect();
            }
            Ok(vectors) => warn!(
                expected = texts.len(),
                got = vectors.len(),
                "Batch returned wrong number of embeddings, retrying one by one"
            ),
            Err(e) => warn!(error = %e, "Batch embedding failed, retrying one by one"),
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embedding_provider.embed(text).await {
                Ok(v) if !v.is_empty() => vectors.push(Some(v)),
                Ok(_) => {
                    warn!("Empty embedding returned");
                    vectors.push(None);
                }
                Err(e) => {
                    let preview: String = text.chars().take(50).collect();
                    warn!(error = %e, text = %preview, "Failed to embed passage");
                    vectors.push(None);
                }
            }
        }
        vectors
    }

    /// Embed `documents` and write the store to `output`.
    ///
    /// # Errors
    /// `IngestionError::Empty` when nothing could be embedded (no file is
    /// written), `StorageError` when the file cannot be written.
    pub async fn build<F>(
        &self,
        documents: &[SourceDocument],
        output: impl AsRef<Path>,
        on_progress: F,
    ) -> IngestionResult<IngestionStats>
    where
        F: FnMut(&IngestionStats),
    {
        let output = output.as_ref();
        let (records, stats) = self.embed_documents(documents, on_progress).await;
        if records.is_empty() {
            return Err(IngestionError::Empty {
                total: stats.total_processed,
                failed: stats.failed,
            });
        }

        EmbeddingStore::from_records(records).save(output).await?;
        info!(
            path = %output.display(),
            model = self.embedding_provider.model_name(),
            inserted = stats.inserted,
            duplicates = stats.duplicates_skipped,
            failed = stats.failed,
            "Embedding store written"
        );
        Ok(stats)
    }

    /// Fetch everything from `provider` and [`build`](Self::build) a store.
    pub async fn build_from_provider<P>(
        &self,
        provider: &P,
        output: impl AsRef<Path>,
    ) -> IngestionResult<IngestionStats>
    where
        P: SourceProvider,
    {
        let documents = provider.fetch_documents().await?;
        info!(provider = provider.name(), documents = documents.len(), "Fetched source documents");
        self.build(&documents, output, |_| {}).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingResult};
    use crate::models::Metadata;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    // ===== Mock Implementations =====

    /// Mock embedding provider with configurable failures.
    #[derive(Clone)]
    struct MockEmbeddingProvider {
        state: Arc<Mutex<MockEmbeddingState>>,
    }

    #[derive(Default)]
    struct MockEmbeddingState {
        embed_calls: Vec<String>,
        embed_batch_calls: Vec<Vec<String>>,
        should_fail: bool,
        fail_on_text: Option<String>,
    }

    impl MockEmbeddingProvider {
        fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(MockEmbeddingState::default())),
            }
        }

        fn with_failure(self, should_fail: bool) -> Self {
            self.state.lock().unwrap().should_fail = should_fail;
            self
        }

        fn fail_on_text(self, text: &str) -> Self {
            self.state.lock().unwrap().fail_on_text = Some(text.to_string());
            self
        }

        fn get_embed_calls(&self) -> Vec<String> {
            self.state.lock().unwrap().embed_calls.clone()
        }

        fn get_embed_batch_calls(&self) -> Vec<Vec<String>> {
            self.state.lock().unwrap().embed_batch_calls.clone()
        }
    }

    fn create_test_embedding(text: &str) -> Vec<f32> {
        vec![text.len() as f32, 1.0, 0.5]
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            let mut state = self.state.lock().unwrap();
            state.embed_calls.push(text.to_string());

            if state.should_fail {
                return Err(EmbeddingError::ApiError("Mock embed failure".to_string()));
            }
            if let Some(ref fail_text) = state.fail_on_text {
                if text.contains(fail_text) {
                    return Err(EmbeddingError::ApiError(format!(
                        "Failed on text containing '{}'",
                        fail_text
                    )));
                }
            }
            Ok(create_test_embedding(text))
        }

        async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
            let mut state = self.state.lock().unwrap();
            state
                .embed_batch_calls
                .push(texts.iter().map(|s| s.to_string()).collect());

            if state.should_fail {
                return Err(EmbeddingError::ApiError("Mock embed_batch failure".to_string()));
            }
            if let Some(ref fail_text) = state.fail_on_text {
                if texts.iter().any(|t| t.contains(fail_text)) {
                    return Err(EmbeddingError::ApiError(format!(
                        "Failed on text containing '{}'",
                        fail_text
                    )));
                }
            }
            Ok(texts.iter().map(|t| create_test_embedding(t)).collect())
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    fn doc(text: &str) -> SourceDocument {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), format!("{}.xml", text.len()));
        SourceDocument::new(text, metadata)
    }

    // ===== Stats =====

    #[test]
    fn test_stats_recording() {
        let mut stats = IngestionStats::new();
        stats.record_inserted();
        stats.record_inserted();
        stats.record_duplicate();
        stats.record_failed();
        assert_eq!(stats.total_processed, 4);
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.duplicates_skipped, 1);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_batch_size_default() {
        assert_eq!(StoreBuilder::new(MockEmbeddingProvider::new(), None).batch_size(), 10);
        assert_eq!(StoreBuilder::new(MockEmbeddingProvider::new(), Some(0)).batch_size(), 10);
        assert_eq!(StoreBuilder::new(MockEmbeddingProvider::new(), Some(3)).batch_size(), 3);
    }

    // ===== Embedding =====

    #[tokio::test]
    async fn test_batches_follow_batch_size() {
        let provider = MockEmbeddingProvider::new();
        let builder = StoreBuilder::new(provider.clone(), Some(2));
        let docs: Vec<SourceDocument> = ["a", "bb", "ccc", "dddd", "eeeee"].iter().map(|t| doc(t)).collect();

        let mut progress_calls = 0;
        let (records, stats) = builder.embed_documents(&docs, |_| progress_calls += 1).await;

        assert_eq!(records.len(), 5);
        assert_eq!(stats.inserted, 5);
        assert_eq!(progress_calls, 3);
        let batches = provider.get_embed_batch_calls();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], vec!["eeeee".to_string()]);
        assert_eq!(records[1].metadata.get("source").unwrap(), "2.xml");
    }

    #[tokio::test]
    async fn test_duplicates_and_empty_texts() {
        let builder = StoreBuilder::new(MockEmbeddingProvider::new(), Some(10));
        let docs = vec![doc("same"), doc("  "), doc("same"), doc("other")];

        let (records, stats) = builder.embed_documents(&docs, |_| {}).await;
        assert_eq!(records.len(), 2);
        assert_eq!(
            stats,
            IngestionStats {
                total_processed: 4,
                inserted: 2,
                duplicates_skipped: 1,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_to_single_texts() {
        let provider = MockEmbeddingProvider::new().fail_on_text("bad");
        let builder = StoreBuilder::new(provider.clone(), Some(10));
        let docs = vec![doc("good one"), doc("bad one"), doc("good two")];

        let (records, stats) = builder.embed_documents(&docs, |_| {}).await;
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.failed, 1);
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["good one", "good two"]);
        assert_eq!(provider.get_embed_calls().len(), 3);
    }

    // ===== Building =====

    #[tokio::test]
    async fn test_build_writes_loadable_store() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("embeddings").join("fulltext.json");
        let builder = StoreBuilder::new(MockEmbeddingProvider::new(), None);

        let stats = builder
            .build(&[doc("alpha"), doc("beta")], &output, |_| {})
            .await
            .unwrap();
        assert_eq!(stats.inserted, 2);

        let store = EmbeddingStore::load(&output).await.unwrap();
        assert_eq!(store.valid_count(), 2);
        assert_eq!(store.dimension(), Some(3));
        assert_eq!(store.records()[0].metadata.get("source").unwrap(), "5.xml");
    }

    #[tokio::test]
    async fn test_build_with_nothing_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("store.json");
        let builder = StoreBuilder::new(MockEmbeddingProvider::new().with_failure(true), None);

        let result = builder.build(&[doc("alpha")], &output, |_| {}).await;
        assert!(matches!(result, Err(IngestionError::Empty { total: 1, failed: 1 })));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_build_from_provider() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("abstracts.json");
        tokio::fs::write(
            &input,
            r#"[{"title": "Paper", "abstract": "Text.", "file_name": "p.xml"}]"#,
        )
        .await
        .unwrap();
        let provider = crate::provider::JsonFileProvider::from_file(&input).await.unwrap();

        let output = dir.path().join("abstract_embeddings.json");
        let builder = StoreBuilder::new(MockEmbeddingProvider::new(), None);
        let stats = builder.build_from_provider(&provider, &output).await.unwrap();
        assert_eq!(stats.inserted, 1);

        let store = EmbeddingStore::load(&output).await.unwrap();
        let record = &store.records()[0];
        assert_eq!(record.text, "Title: Paper\nAbstract: Text.");
        assert_eq!(record.metadata.get("title").unwrap(), "Paper");
        assert_eq!(record.metadata.get("file_name").unwrap(), "p.xml");
    }
}

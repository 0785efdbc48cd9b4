//! Keyword-driven retrieval over embedding stores.
//!
//! The orchestrator embeds each query through an [`EmbeddingProvider`], ranks
//! it against a store and merges the per-keyword hits into one deduplicated,
//! best-first list. Nothing here is fatal: an unreadable store, an empty store
//! or a failed embedding call all degrade to fewer (or no) results.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::embedding::EmbeddingProvider;
use crate::models::SearchResult;
use crate::ranking::{rank, rank_excluding, RankingOptions};
use crate::store::{EmbeddingStore, StoreError};

/// Runs searches against embedding stores.
///
/// Stores are loaded fresh on every path-based call.
pub struct RetrievalOrchestrator<E>
where
    E: EmbeddingProvider,
{
    embedder: E,
    cancel: CancelFlag,
}

impl<E> RetrievalOrchestrator<E>
where
    E: EmbeddingProvider,
{
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            cancel: CancelFlag::new(),
        }
    }

    /// Share a cancellation flag, checked before each keyword.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Search the store at `store_path` once per keyword and merge the hits.
    ///
    /// `options.top_k` applies per keyword; the merged list holds at most
    /// `options.top_k * keywords.len()` entries.
    pub async fn search_by_keywords(
        &self,
        keywords: &[String],
        store_path: &Path,
        options: &RankingOptions,
    ) -> Vec<SearchResult> {
        if keywords.is_empty() {
            debug!(store = %store_path.display(), "No keywords, skipping search");
            return Vec::new();
        }
        match load_store(store_path).await {
            Some(store) => self.search_store_by_keywords(keywords, &store, options).await,
            None => Vec::new(),
        }
    }

    /// [`search_by_keywords`](Self::search_by_keywords) over an already loaded store.
    pub async fn search_store_by_keywords(
        &self,
        keywords: &[String],
        store: &EmbeddingStore,
        options: &RankingOptions,
    ) -> Vec<SearchResult> {
        if store.is_empty() {
            info!("Embedding store is empty, no results");
            return Vec::new();
        }

        let mut all_results = Vec::new();
        for keyword in keywords {
            if self.cancel.is_cancelled() {
                info!("Cancelled, stopping keyword search");
                break;
            }
            let keyword = keyword.trim();
            if keyword.is_empty() {
                continue;
            }

            let query = match self.embedder.embed(keyword).await {
                Ok(vector) => vector,
                Err(e) => {
                    warn!(keyword = %keyword, error = %e, "Failed to embed keyword, skipping");
                    continue;
                }
            };

            let mut hits = rank(&query, store.records(), options);
            debug!(keyword = %keyword, hits = hits.len(), "Keyword search complete");
            for hit in &mut hits {
                hit.source_keyword = Some(keyword.to_string());
            }
            all_results.extend(hits);
        }

        merge_keyword_results(all_results, options.top_k.saturating_mul(keywords.len()))
    }

    /// Embed a free-text query and rank the store at `store_path` against it.
    pub async fn search_by_text(
        &self,
        query: &str,
        store_path: &Path,
        options: &RankingOptions,
    ) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let Some(store) = load_store(store_path).await else {
            return Vec::new();
        };
        if store.is_empty() {
            info!("Embedding store is empty, no results");
            return Vec::new();
        }

        match self.embedder.embed(query).await {
            Ok(vector) => rank(&vector, store.records(), options),
            Err(e) => {
                warn!(error = %e, "Failed to embed query");
                Vec::new()
            }
        }
    }

    /// Find records similar to one already in the store.
    ///
    /// The record whose text equals `text` exactly supplies the query vector
    /// and is left out of its own results. Unknown text yields no results.
    pub async fn search_by_existing_text(
        &self,
        text: &str,
        store_path: &Path,
        options: &RankingOptions,
    ) -> Vec<SearchResult> {
        let Some(store) = load_store(store_path).await else {
            return Vec::new();
        };
        search_similar_to_record(&store, text, options)
    }
}

/// Rank `store` against the vector of the record whose text is `text`.
pub fn search_similar_to_record(
    store: &EmbeddingStore,
    text: &str,
    options: &RankingOptions,
) -> Vec<SearchResult> {
    let Some((index, record)) = store.find_by_text(text) else {
        info!("Text not found in store");
        return Vec::new();
    };
    match record.vector.as_deref() {
        Some(vector) if !vector.is_empty() => rank_excluding(vector, store.records(), options, Some(index)),
        _ => {
            warn!(index, "Matched record has no embedding");
            Vec::new()
        }
    }
}

/// Deduplicate keyword hits by exact text.
///
/// For each distinct non-empty text the highest-scoring occurrence survives,
/// carrying the set of every keyword that surfaced it. The merged list is
/// sorted best-first and cut to `cap` entries.
pub fn merge_keyword_results(results: Vec<SearchResult>, cap: usize) -> Vec<SearchResult> {
    let before = results.len();
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for result in results {
        if result.text.is_empty() {
            continue;
        }
        match positions.get(&result.text) {
            Some(&pos) => {
                let existing = &mut merged[pos];
                let mut keywords = std::mem::take(&mut existing.source_keywords);
                keywords.extend(result.source_keyword.iter().cloned());
                if result.similarity > existing.similarity {
                    *existing = result;
                }
                existing.source_keywords = keywords;
            }
            None => {
                let mut result = result;
                result.source_keywords.extend(result.source_keyword.iter().cloned());
                positions.insert(result.text.clone(), merged.len());
                merged.push(result);
            }
        }
    }

    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(before, after = merged.len(), "Deduplicated keyword results");
    merged.truncate(cap);
    merged
}

async fn load_store(path: &Path) -> Option<EmbeddingStore> {
    match EmbeddingStore::load(path).await {
        Ok(store) => Some(store),
        Err(StoreError::NotFound(path)) => {
            warn!(store = %path.display(), "Embedding store not found, no results");
            None
        }
        Err(e) => {
            warn!(error = %e, "Embedding store unreadable, no results");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingError, EmbeddingResult};
    use crate::models::{EmbeddingRecord, Metadata};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    /// Maps known keywords to fixed vectors and records every call.
    struct MockEmbedding {
        vectors: HashMap<String, Vec<f32>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockEmbedding {
        fn new(pairs: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbedding {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            self.calls.lock().unwrap().push(text.to_string());
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| EmbeddingError::ApiError(format!("unknown text {}", text)))
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    fn store() -> EmbeddingStore {
        EmbeddingStore::from_records(vec![
            EmbeddingRecord::new("x-axis", vec![1.0, 0.0], Metadata::new()),
            EmbeddingRecord::new("y-axis", vec![0.0, 1.0], Metadata::new()),
            EmbeddingRecord::new("diagonal", vec![0.707, 0.707], Metadata::new()),
        ])
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn hit(text: &str, similarity: f32, keyword: &str) -> SearchResult {
        let mut result = SearchResult::new(0, text.to_string(), similarity, Metadata::new());
        result.source_keyword = Some(keyword.to_string());
        result
    }

    #[test]
    fn test_merge_keeps_best_score_and_all_keywords() {
        let merged = merge_keyword_results(vec![hit("T", 0.6, "k2"), hit("T", 0.8, "k1")], 10);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].similarity - 0.8).abs() < 1e-6);
        assert_eq!(merged[0].source_keyword.as_deref(), Some("k1"));
        let expected: BTreeSet<String> = ["k1", "k2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(merged[0].source_keywords, expected);
    }

    #[test]
    fn test_merge_first_seen_wins_ties() {
        let merged = merge_keyword_results(vec![hit("T", 0.5, "a"), hit("T", 0.5, "b")], 10);
        assert_eq!(merged[0].source_keyword.as_deref(), Some("a"));
        assert_eq!(merged[0].source_keywords.len(), 2);
    }

    #[test]
    fn test_merge_sorts_caps_and_skips_empty_text() {
        let merged = merge_keyword_results(
            vec![hit("low", 0.2, "k"), hit("", 0.9, "k"), hit("high", 0.7, "k"), hit("mid", 0.5, "k")],
            2,
        );
        let texts: Vec<&str> = merged.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "mid"]);
    }

    #[tokio::test]
    async fn test_duplicate_keyword_is_idempotent() {
        let orchestrator = RetrievalOrchestrator::new(MockEmbedding::new(&[("k", vec![1.0, 0.0])]));
        let options = RankingOptions::new(10, 0.5);

        let single = orchestrator
            .search_store_by_keywords(&keywords(&["k"]), &store(), &options)
            .await;
        let doubled = orchestrator
            .search_store_by_keywords(&keywords(&["k", "k"]), &store(), &options)
            .await;

        assert_eq!(single, doubled);
        assert_eq!(doubled.len(), 2);
        for result in &doubled {
            assert_eq!(result.source_keywords.len(), 1);
            assert!(result.source_keywords.contains("k"));
        }
    }

    #[tokio::test]
    async fn test_failed_and_empty_keywords_are_skipped() {
        let embedder = MockEmbedding::new(&[("good", vec![0.0, 1.0])]);
        let calls = embedder.calls.clone();
        let orchestrator = RetrievalOrchestrator::new(embedder);

        let results = orchestrator
            .search_store_by_keywords(&keywords(&["", "broken", "good"]), &store(), &RankingOptions::new(5, 0.5))
            .await;

        assert_eq!(calls.lock().unwrap().as_slice(), &["broken".to_string(), "good".to_string()]);
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["y-axis", "diagonal"]);
    }

    #[tokio::test]
    async fn test_cap_is_top_k_times_keywords() {
        let orchestrator = RetrievalOrchestrator::new(MockEmbedding::new(&[
            ("x", vec![1.0, 0.0]),
            ("y", vec![0.0, 1.0]),
        ]));
        let results = orchestrator
            .search_store_by_keywords(&keywords(&["x", "y"]), &store(), &RankingOptions::new(1, 0.5))
            .await;
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["x-axis", "y-axis"]);
    }

    #[tokio::test]
    async fn test_cancelled_search_stops_before_embedding() {
        let embedder = MockEmbedding::new(&[("x", vec![1.0, 0.0])]);
        let calls = embedder.calls.clone();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let orchestrator = RetrievalOrchestrator::new(embedder).with_cancel_flag(cancel);

        let results = orchestrator
            .search_store_by_keywords(&keywords(&["x"]), &store(), &RankingOptions::default())
            .await;
        assert!(results.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_empty_store_files() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = MockEmbedding::new(&[("x", vec![1.0, 0.0])]);
        let calls = embedder.calls.clone();
        let orchestrator = RetrievalOrchestrator::new(embedder);
        let options = RankingOptions::default();

        let missing = orchestrator
            .search_by_keywords(&keywords(&["x"]), &dir.path().join("missing.json"), &options)
            .await;
        assert!(missing.is_empty());

        let empty_path = dir.path().join("empty.json");
        tokio::fs::write(&empty_path, "").await.unwrap();
        let empty = orchestrator
            .search_by_keywords(&keywords(&["x"]), &empty_path, &options)
            .await;
        assert!(empty.is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_by_text_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        store().save(&path).await.unwrap();

        let orchestrator = RetrievalOrchestrator::new(MockEmbedding::new(&[("query", vec![1.0, 0.0])]));
        let results = orchestrator
            .search_by_text("query", &path, &RankingOptions::new(10, 0.5))
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "x-axis");

        let failed = orchestrator
            .search_by_text("unembeddable", &path, &RankingOptions::new(10, 0.5))
            .await;
        assert!(failed.is_empty());
    }

    #[test]
    fn test_search_similar_to_record_excludes_itself() {
        let results = search_similar_to_record(&store(), "x-axis", &RankingOptions::new(10, 0.5));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "diagonal");

        assert!(search_similar_to_record(&store(), "unknown", &RankingOptions::default()).is_empty());
    }
}

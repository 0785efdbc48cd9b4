//! Brute-force similarity ranking.
//!
//! Every valid record in a store is scored against the query vector, records
//! at or below the threshold are dropped, and the rest are returned best-first.
//! Stores are small (hundreds to low thousands of records), so a linear scan
//! per query is all that is needed.

use std::time::Instant;

use tracing::debug;

use crate::models::{EmbeddingRecord, SearchResult};
use crate::vector::{cosine_similarity, normalize};

/// Default number of results for a single ranking call.
pub const DEFAULT_TOP_K: usize = 10;

/// Default similarity threshold for a single ranking call.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Parameters for one ranking call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingOptions {
    /// Maximum number of results to return
    pub top_k: usize,

    /// Results must score strictly above this value
    pub threshold: f32,
}

impl RankingOptions {
    /// Create ranking options.
    pub fn new(top_k: usize, threshold: f32) -> Self {
        Self { top_k, threshold }
    }
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K, DEFAULT_THRESHOLD)
    }
}

/// Rank `records` against `query`.
///
/// Invalid records (no text or no vector), and records whose dimensionality
/// differs from the query, are skipped. Ties keep store order. An empty result is a normal
/// outcome.
pub fn rank(query: &[f32], records: &[EmbeddingRecord], options: &RankingOptions) -> Vec<SearchResult> {
    rank_excluding(query, records, options, None)
}

/// Rank `records` against `query`, never returning the record at `excluded`.
pub fn rank_excluding(
    query: &[f32],
    records: &[EmbeddingRecord],
    options: &RankingOptions,
    excluded: Option<usize>,
) -> Vec<SearchResult> {
    let start = Instant::now();
    let query = normalize(query);

    let mut results: Vec<SearchResult> = Vec::new();
    let mut skipped = 0usize;

    for (index, record) in records.iter().enumerate() {
        if Some(index) == excluded {
            continue;
        }
        let vector = match record.vector.as_deref() {
            Some(v) if record.is_valid() && v.len() == query.len() => v,
            _ => {
                skipped += 1;
                continue;
            }
        };

        let similarity = cosine_similarity(&query, &normalize(vector));
        if similarity > options.threshold {
            results.push(SearchResult::new(
                index,
                record.text.clone(),
                similarity,
                record.metadata.clone(),
            ));
        }
    }

    // Stable sort: equal scores keep store order.
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let matched = results.len();
    results.truncate(options.top_k);

    debug!(
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        matched,
        returned = results.len(),
        skipped,
        "Ranked store records"
    );

    results
}

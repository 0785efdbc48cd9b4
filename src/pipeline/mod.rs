//! Outline-to-literature pipeline.
//!
//! ```text
//! Decomposed -> PerBlockSearching -> PerBlockRefining -> PerBlockFulltextSearch
//!            -> (next block ...) -> Aggregated -> [Synthesized]
//! ```
//!
//! Every block is checkpointed to `block_{n}.json` as soon as it completes, so
//! an interrupted run leaves the finished blocks on disk. Only a missing store
//! (configuration) or an outline that yields no blocks (decomposition) fails a
//! run; everything else degrades to empty results for the step concerned.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cancel::CancelFlag;
use crate::config::PipelineConfig;
use crate::embedding::EmbeddingProvider;
use crate::llm::{strip_reasoning, CompletionProvider, LlmError};
use crate::models::{AggregateResult, BlockResult, OutlineBlock, SearchResult};
use crate::outline::OutlineDecomposer;
use crate::refine::KeywordRefiner;
use crate::retrieval::RetrievalOrchestrator;

/// Decomposition output file.
pub const DECOMPOSED_FILE: &str = "outline_decomposed.json";

/// Aggregate output file.
pub const FINAL_RESULT_FILE: &str = "final_result.json";

/// Subdirectory for synthesized review text.
pub const REVIEWS_DIR: &str = "reviews";

/// Errors that stop a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A store is missing or the output directory is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The outline could not be decomposed into at least one block
    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A generation call failed; recovered per block
    #[error("Synthesis failed: {0}")]
    Synthesis(#[from] LlmError),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Decomposed,
    PerBlockSearching,
    PerBlockRefining,
    PerBlockFulltextSearch,
    Aggregated,
    Synthesized,
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Aggregate of every block that completed
    pub aggregate: AggregateResult,

    /// Location of `final_result.json`
    pub final_result_path: PathBuf,

    /// The run stopped early on request
    pub cancelled: bool,

    /// Last stage reached
    pub stage: PipelineStage,
}

/// What a synthesis pass produced.
#[derive(Debug, Clone, Default)]
pub struct ReviewOutcome {
    /// Per-block review files, in block order
    pub block_reviews: Vec<PathBuf>,

    /// Merged review document, when at least one block succeeded
    pub merged_review: Option<PathBuf>,

    /// `n` of each `block_{n}.json` whose synthesis failed
    pub failed_blocks: Vec<usize>,

    pub cancelled: bool,
}

/// File name of the checkpoint for the block at zero-based `index`.
pub fn block_file_name(index: usize) -> String {
    format!("block_{}.json", index + 1)
}

fn block_file_number(name: &str) -> Option<usize> {
    name.strip_prefix("block_")?.strip_suffix(".json")?.parse().ok()
}

/// Drives decomposition, per-block retrieval and synthesis.
pub struct OutlinePipeline<E, L>
where
    E: EmbeddingProvider,
    L: CompletionProvider,
{
    retrieval: RetrievalOrchestrator<E>,
    llm: L,
    decomposer: Box<dyn OutlineDecomposer>,
    refiner: KeywordRefiner,
    config: PipelineConfig,
    cancel: CancelFlag,
}

impl<E, L> OutlinePipeline<E, L>
where
    E: EmbeddingProvider,
    L: CompletionProvider,
{
    /// Create a pipeline.
    ///
    /// # Arguments
    /// * `embedder` - Embeds keywords for both store searches
    /// * `llm` - Refines keywords and writes reviews
    /// * `decomposer` - Splits the outline into blocks
    /// * `config` - Stores, thresholds and output directory
    pub fn new(embedder: E, llm: L, decomposer: Box<dyn OutlineDecomposer>, config: PipelineConfig) -> Self {
        let cancel = CancelFlag::new();
        Self {
            retrieval: RetrievalOrchestrator::new(embedder).with_cancel_flag(cancel.clone()),
            llm,
            decomposer,
            refiner: KeywordRefiner::new(config.max_refined_keywords),
            config,
            cancel,
        }
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.retrieval = self.retrieval.with_cancel_flag(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Check that the run can start: stores present (unless allowed to be
    /// missing) and the output directory creatable.
    pub async fn preflight(&self) -> PipelineResult<()> {
        if !self.config.allow_missing_stores {
            for (kind, path) in [
                ("abstract", &self.config.abstract_store),
                ("fulltext", &self.config.fulltext_store),
            ] {
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(PipelineError::Configuration(format!(
                        "{} store not found: {}",
                        kind,
                        path.display()
                    )));
                }
            }
        }

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                PipelineError::Configuration(format!(
                    "cannot create output directory {}: {}",
                    self.config.output_dir.display(),
                    e
                ))
            })
    }

    /// Run the whole outline.
    ///
    /// # Errors
    /// `Configuration` if preflight fails, `Decomposition` if the outline
    /// yields no blocks (no block files are written in either case), `Io` or
    /// `Serialization` if the decomposition or aggregate file cannot be saved.
    pub async fn process_outline(&self, outline: &str) -> PipelineResult<PipelineOutcome> {
        self.preflight().await?;

        let decomposed = self
            .decomposer
            .decompose(outline)
            .await
            .map_err(|e| PipelineError::Decomposition(e.to_string()))?;
        if decomposed.blocks.is_empty() {
            error!("Outline decomposition produced no blocks");
            return Err(PipelineError::Decomposition("outline produced no blocks".to_string()));
        }

        let blocks = &decomposed.blocks;
        let decomposed_path = self.config.output_dir.join(DECOMPOSED_FILE);
        write_json(&decomposed_path, &decomposed).await?;
        info!(
            stage = ?PipelineStage::Decomposed,
            blocks = blocks.len(),
            path = %decomposed_path.display(),
            "Saved decomposed outline"
        );

        let mut blocks_results = Vec::with_capacity(blocks.len());
        let mut cancelled = false;
        for (index, block) in blocks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(completed = blocks_results.len(), total = blocks.len(), "Run cancelled");
                cancelled = true;
                break;
            }
            match self.process_block(block, index).await {
                Some(result) => blocks_results.push(result),
                None => {
                    warn!(completed = blocks_results.len(), total = blocks.len(), "Run cancelled mid-block");
                    cancelled = true;
                    break;
                }
            }
        }

        // A cancel that lands after the last stage check still stops later work.
        cancelled |= self.cancel.is_cancelled();

        let aggregate = AggregateResult {
            outline: outline.to_string(),
            blocks_count: blocks.len(),
            blocks_results,
        };
        let final_result_path = self.config.output_dir.join(FINAL_RESULT_FILE);
        write_json(&final_result_path, &aggregate).await?;
        info!(
            stage = ?PipelineStage::Aggregated,
            path = %final_result_path.display(),
            "Saved aggregate result"
        );

        Ok(PipelineOutcome {
            aggregate,
            final_result_path,
            cancelled,
            stage: PipelineStage::Aggregated,
        })
    }

    /// Search, refine and search again for one block, then checkpoint it.
    ///
    /// Each step falls back to empty results or the original keywords, and a
    /// checkpoint that cannot be written is logged. Returns `None` when the
    /// run is cancelled before the block finishes; no checkpoint is written
    /// for it.
    pub async fn process_block(&self, block: &OutlineBlock, index: usize) -> Option<BlockResult> {
        let number = index + 1;
        info!(block = number, title = %block.title, "Processing block");

        let original_keywords = block.keywords.clone();
        if original_keywords.is_empty() {
            warn!(block = number, "Block has no keywords");
        }

        info!(stage = ?PipelineStage::PerBlockSearching, block = number, keywords = ?original_keywords, "Searching abstracts");
        let abstract_results = self
            .retrieval
            .search_by_keywords(&original_keywords, &self.config.abstract_store, &self.config.abstract_options())
            .await;
        if self.block_interrupted(number, PipelineStage::PerBlockSearching) {
            return None;
        }

        info!(stage = ?PipelineStage::PerBlockRefining, block = number, abstracts = abstract_results.len(), "Refining keywords");
        let enhanced_keywords = self.refiner.refine(&self.llm, block, &abstract_results).await;
        if self.block_interrupted(number, PipelineStage::PerBlockRefining) {
            return None;
        }

        info!(stage = ?PipelineStage::PerBlockFulltextSearch, block = number, keywords = ?enhanced_keywords, "Searching full text");
        let fulltext_results = self
            .retrieval
            .search_by_keywords(&enhanced_keywords, &self.config.fulltext_store, &self.config.fulltext_options())
            .await;
        if self.block_interrupted(number, PipelineStage::PerBlockFulltextSearch) {
            return None;
        }

        let result = BlockResult {
            block_index: index,
            block_info: block.clone(),
            original_keywords,
            enhanced_keywords,
            abstract_results,
            fulltext_results,
        };

        let path = self.config.output_dir.join(block_file_name(index));
        match write_json(&path, &result).await {
            Ok(()) => info!(block = number, path = %path.display(), "Saved block result"),
            Err(e) => error!(block = number, error = %e, "Failed to save block result"),
        }
        Some(result)
    }

    fn block_interrupted(&self, number: usize, stage: PipelineStage) -> bool {
        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!(block = number, stage = ?stage, "Cancelled, discarding partial block");
        }
        cancelled
    }

    /// Write a review section for every `block_{n}.json` in `dir`.
    ///
    /// Blocks are handled in numeric order and keep the number from their file
    /// name, so gaps left by a cancelled run carry through. A block whose file
    /// is unreadable or whose generation call fails is logged and left out of
    /// the merged document.
    pub async fn generate_review(&self, dir: &Path) -> PipelineResult<ReviewOutcome> {
        let block_files = list_block_files(dir).await?;
        if block_files.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "no block_*.json files in {}",
                dir.display()
            )));
        }
        info!(blocks = block_files.len(), dir = %dir.display(), "Generating review");

        let reviews_dir = dir.join(REVIEWS_DIR);
        tokio::fs::create_dir_all(&reviews_dir)
            .await
            .map_err(|source| PipelineError::Io {
                path: reviews_dir.clone(),
                source,
            })?;

        let mut outcome = ReviewOutcome::default();
        let mut sections: Vec<(String, String)> = Vec::new();

        for (number, path) in block_files {
            if self.cancel.is_cancelled() {
                warn!(completed = sections.len(), "Review generation cancelled");
                outcome.cancelled = true;
                break;
            }

            match self.synthesize_block(&path, number, &reviews_dir).await {
                Ok((title, text, review_path)) => {
                    info!(block = number, path = %review_path.display(), "Saved block review");
                    outcome.block_reviews.push(review_path);
                    sections.push((title, text));
                }
                Err(e) => {
                    error!(block = number, file = %path.display(), error = %e, "Block synthesis failed");
                    outcome.failed_blocks.push(number);
                }
            }
        }

        if !sections.is_empty() {
            let mut merged = String::new();
            for (title, text) in &sections {
                merged.push_str(&format!("# {}\n\n{}\n\n", title, text));
            }
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            let merged_path = reviews_dir.join(format!("complete_review_{}.md", timestamp));
            write_text(&merged_path, &merged).await?;
            info!(stage = ?PipelineStage::Synthesized, path = %merged_path.display(), "Saved merged review");
            outcome.merged_review = Some(merged_path);
        }

        Ok(outcome)
    }

    async fn synthesize_block(
        &self,
        path: &Path,
        number: usize,
        reviews_dir: &Path,
    ) -> PipelineResult<(String, String, PathBuf)> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PipelineError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let block: BlockResult = serde_json::from_str(&content)?;

        let title = if block.block_info.title.trim().is_empty() {
            format!("Section {}", number)
        } else {
            block.block_info.title.clone()
        };
        let references = select_references(&block, self.config.max_references);
        let prompt = build_synthesis_prompt(&title, &block.block_info.content, &references);

        let text = strip_reasoning(&self.llm.complete(&prompt).await?);

        let review_path = reviews_dir.join(format!("block_{}_review.txt", number));
        write_text(&review_path, &format!("# {}\n\n{}", title, text)).await?;
        Ok((title, text, review_path))
    }
}

/// The best `limit` non-empty passages from a block's abstract and full-text
/// hits, highest similarity first.
pub fn select_references(block: &BlockResult, limit: usize) -> Vec<&SearchResult> {
    let mut references: Vec<&SearchResult> = block
        .abstract_results
        .iter()
        .chain(block.fulltext_results.iter())
        .filter(|r| !r.text.trim().is_empty())
        .collect();
    references.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    references.truncate(limit);
    references
}

/// Build the synthesis prompt for one block.
pub fn build_synthesis_prompt(title: &str, content: &str, references: &[&SearchResult]) -> String {
    let references_text = references
        .iter()
        .enumerate()
        .map(|(j, r)| format!("Reference {} [similarity: {:.2}]:\n{}\n", j + 1, r.similarity, r.text))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Using the outline section and the reference passages below, write one part of an academic literature review.

[Outline section]
Title: {title}
Content: {content}

[Reference passages]
{references_text}

Write the review text for "{title}". Requirements:
1. Academic register, rigorous and objective
2. Complete and coherent, closely tied to the outline section
3. Draw on the views and findings of the references without copying them
4. Roughly 800-1500 words
5. No citation markers; weave the sources into the prose
6. No introduction or conclusion; start directly with the body

Reply with the section text only.
"#
    )
}

async fn list_block_files(dir: &Path) -> PipelineResult<Vec<(usize, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|source| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut numbered = Vec::new();
    loop {
        let entry = entries.next_entry().await.map_err(|source| PipelineError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let Some(entry) = entry else { break };
        let name = entry.file_name();
        if let Some(number) = name.to_str().and_then(block_file_number) {
            numbered.push((number, entry.path()));
        }
    }
    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered)
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_text(path, &json).await
}

async fn write_text(path: &Path, text: &str) -> PipelineResult<()> {
    tokio::fs::write(path, text)
        .await
        .map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn result(text: &str, similarity: f32) -> SearchResult {
        SearchResult::new(0, text.to_string(), similarity, Metadata::new())
    }

    #[test]
    fn test_block_file_names() {
        assert_eq!(block_file_name(0), "block_1.json");
        assert_eq!(block_file_number("block_12.json"), Some(12));
        assert_eq!(block_file_number("block_2_review.txt"), None);
        assert_eq!(block_file_number("final_result.json"), None);
    }

    #[test]
    fn test_select_references() {
        let block = BlockResult {
            block_index: 0,
            block_info: OutlineBlock::default(),
            original_keywords: vec![],
            enhanced_keywords: vec![],
            abstract_results: vec![result("a", 0.3), result("", 0.99)],
            fulltext_results: vec![result("f1", 0.8), result("f2", 0.1)],
        };
        let refs = select_references(&block, 2);
        let texts: Vec<&str> = refs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["f1", "a"]);
    }

    #[test]
    fn test_synthesis_prompt() {
        let r = result("Passage text", 0.876);
        let prompt = build_synthesis_prompt("Methods", "How it is done", &[&r]);
        assert!(prompt.contains("Title: Methods"));
        assert!(prompt.contains("Reference 1 [similarity: 0.88]:\nPassage text"));
    }
}

//! Literature retrieval for outline-driven review drafting.
//!
//! This library finds the abstracts and full-text paragraphs most similar to
//! a query, using precomputed embedding vectors and cosine similarity, and
//! drives a pipeline that turns a review outline into per-section literature.
//!
//! # Architecture
//!
//! - **vector**: normalization and cosine similarity
//! - **models**: records, search results, outline blocks and result files
//! - **store**: loading and writing embedding store files
//! - **ranking**: thresholded top-k ranking over a store
//! - **embedding**: text-to-vector providers (OpenAI-compatible HTTP)
//! - **llm**: text-completion providers (OpenAI-compatible HTTP)
//! - **retrieval**: multi-keyword search with cross-keyword deduplication
//! - **refine**: LLM keyword refinement with a lenient parser chain
//! - **outline**: outline decomposition into blocks
//! - **pipeline**: the per-block search/refine/search loop, aggregation and
//!   review synthesis
//! - **provider** / **ingestion**: building stores from extracted passages
//! - **config**, **cancel**: runtime settings and cooperative cancellation
//!
//! # Workflow
//!
//! ## Offline
//!
//! 1. Extract abstracts and paragraphs (outside this crate)
//! 2. Embed them into an abstract store and a full-text store
//!
//! ## Per outline
//!
//! 1. Decompose the outline into blocks
//! 2. Search the abstract store with each block's keywords
//! 3. Refine the keywords from the abstracts found
//! 4. Search the full-text store with the refined keywords
//! 5. Checkpoint each block, aggregate, optionally synthesize a review
//!
//! # Example
//!
//! ```ignore
//! use litreview_search::{
//!     embedding::openai::OpenAIEmbedding,
//!     ranking::RankingOptions,
//!     retrieval::RetrievalOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let embedder = OpenAIEmbedding::new(&api_key, base_url, model, timeout, 3)?;
//!     let retrieval = RetrievalOrchestrator::new(embedder);
//!
//!     let keywords = vec!["graph neural networks".to_string()];
//!     let results = retrieval
//!         .search_by_keywords(&keywords, "embeddings/abstract_embeddings.json".as_ref(), &RankingOptions::default())
//!         .await;
//!
//!     for result in results {
//!         println!("{:.4}: {}", result.similarity, result.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod embedding;
pub mod ingestion;
pub mod llm;
pub mod models;
pub mod outline;
pub mod pipeline;
pub mod provider;
pub mod ranking;
pub mod refine;
pub mod retrieval;
pub mod store;
pub mod vector;

// Re-export commonly used types at the crate root
pub use cancel::CancelFlag;
pub use embedding::EmbeddingProvider;
pub use llm::CompletionProvider;
pub use models::{BlockResult, EmbeddingRecord, OutlineBlock, RelevanceLevel, SearchResult};
pub use pipeline::{OutlinePipeline, PipelineError};
pub use ranking::RankingOptions;
pub use retrieval::RetrievalOrchestrator;
pub use store::EmbeddingStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Ingestion binary entry point.
//!
//! Embeds the passages produced by the abstract or full-text extractor and
//! writes them as an embedding store file.
//!
//! # Examples
//!
//! Build the abstract store:
//! ```bash
//! ingestion --input extracted/abstracts.json --output embeddings/abstract_embeddings.json
//! ```
//!
//! Build the full-text store with larger batches:
//! ```bash
//! ingestion --input extracted/paragraphs.json --output embeddings/fulltext_embeddings.json --batch-size 25
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use litreview_search::{
    config::ApiSettings,
    embedding::{openai::OpenAIEmbedding, EmbeddingProvider},
    ingestion::{IngestionError, StoreBuilder},
    provider::{JsonFileProvider, SourceProvider},
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Ingestion CLI for building embedding stores
#[derive(Parser, Debug)]
#[command(
    name = "ingestion",
    version,
    about = "Build an embedding store from extracted passages",
    long_about = "Embeds extracted abstracts or paragraphs with an OpenAI-compatible embedding \
                  endpoint and writes them as an embedding store.

The API key is read from ARK_API_KEY, DOUBAO_API_KEY or OPENAI_API_KEY. LLM_BASE_URL, \
EMBEDDING_MODEL and BATCH_SIZE override the endpoint, model and batch size.

EXAMPLES:
  Abstract store:
    ingestion --input extracted/abstracts.json --output embeddings/abstract_embeddings.json

  Full-text store:
    ingestion --input extracted/paragraphs.json --output embeddings/fulltext_embeddings.json

  Custom batch size and logging:
    ingestion --input abstracts.json --output store.json --batch-size 25 --log-level debug"
)]
struct IngestionArgs {
    /// Extractor output: a JSON array of abstract or paragraph entries
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Embedding store file to write
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Number of passages per embedding request (defaults to BATCH_SIZE or 10)
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Embedding model name (defaults to EMBEDDING_MODEL)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// Only embed the first N passages
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Create the embedding provider from environment settings and CLI overrides
fn create_embedding_provider(args: &IngestionArgs, settings: &ApiSettings) -> Result<OpenAIEmbedding> {
    let model = args
        .embedding_model
        .clone()
        .unwrap_or_else(|| settings.embedding_model.clone());

    let provider = OpenAIEmbedding::new(
        &settings.api_key,
        &settings.base_url,
        model,
        settings.embedding_timeout,
        settings.max_retries,
    )
    .context("Failed to initialize embedding provider")?;

    info!(
        "Embedding provider initialized: model={}, base_url={}",
        provider.model_name(),
        settings.base_url
    );
    Ok(provider)
}

/// Create a progress bar for tracking ingestion
fn create_progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} passages | Embedded: {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IngestionArgs::parse();
    init_logging(&args.log_level);

    info!("Starting embedding store ingestion");
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();

    if !args.input.exists() {
        error!("Input file does not exist: {:?}", args.input);
        anyhow::bail!("Input file not found: {:?}", args.input);
    }

    let settings = ApiSettings::from_env().context("Cannot reach the embedding endpoint")?;
    let embedding_provider = create_embedding_provider(&args, &settings)?;
    let builder = StoreBuilder::new(embedding_provider, args.batch_size.or(Some(settings.batch_size)));

    info!("Loading passages from {:?}...", args.input);
    let provider = JsonFileProvider::from_file(&args.input)
        .await
        .with_context(|| format!("Failed to load passages from {:?}", args.input))?;

    let documents = match args.limit {
        Some(limit) => provider.fetch_documents_limit(limit).await?,
        None => provider.fetch_documents().await?,
    };
    info!("Found {} passages from {}", documents.len(), provider.name());

    if documents.is_empty() {
        warn!("No passages found in input file");
        return Ok(());
    }

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }

    let progress = create_progress_bar(documents.len())?;
    progress.set_message("0");

    info!("Embedding passages with batch_size={}...", builder.batch_size());
    let result = builder
        .build(&documents, &args.output, |stats| {
            progress.set_position(stats.total_processed as u64);
            progress.set_message(stats.inserted.to_string());
        })
        .await;

    let stats = match result {
        Ok(stats) => stats,
        Err(IngestionError::Empty { total, failed }) => {
            progress.abandon();
            anyhow::bail!("No embeddings were generated ({} of {} passages failed); nothing written", failed, total);
        }
        Err(e) => {
            progress.abandon();
            return Err(e).context("Failed to build embedding store");
        }
    };

    progress.finish_with_message(stats.inserted.to_string());

    let elapsed = start_time.elapsed();
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Ingestion Completed               ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Total processed:      {:>16} ║", stats.total_processed);
    println!("║ Embedded:             {:>16} ║", stats.inserted);
    println!("║ Duplicates skipped:   {:>16} ║", stats.duplicates_skipped);
    println!("║ Failed:               {:>16} ║", stats.failed);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");
    println!("Store written to {}", args.output.display());

    if stats.failed > 0 {
        warn!(
            "{} passages failed to embed - check logs for details",
            stats.failed
        );
    }

    info!("Ingestion completed successfully");

    Ok(())
}

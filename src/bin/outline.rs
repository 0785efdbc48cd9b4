//! Outline pipeline binary entry point.
//!
//! Runs a review outline through decomposition, per-block literature
//! retrieval and keyword refinement, and optionally drafts review text from
//! the results.
//!
//! # Examples
//!
//! Run an outline stored in a file:
//! ```bash
//! outline run --outline-file outline.md --config pipeline.toml
//! ```
//!
//! Run and draft the review in one go:
//! ```bash
//! outline run --outline "1. Background ... 2. Methods ..." --review
//! ```
//!
//! Redraft the review for an earlier run:
//! ```bash
//! outline review outline_results
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use litreview_search::{
    config::{ApiSettings, PipelineConfig},
    embedding::openai::OpenAIEmbedding,
    llm::openai::OpenAIChat,
    models::AggregateResult,
    outline::LlmOutlineDecomposer,
    pipeline::ReviewOutcome,
    CancelFlag, OutlinePipeline,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Outline-driven literature retrieval
#[derive(Parser, Debug)]
#[command(
    name = "outline",
    version,
    about = "Find literature for every section of a review outline",
    long_about = "Decomposes a review outline into sections, searches the abstract store with each \
                  section's keywords, refines the keywords from the abstracts found and searches the \
                  full-text store with them. Results are written per section as they complete.

The API key is read from ARK_API_KEY, DOUBAO_API_KEY or OPENAI_API_KEY. LLM_BASE_URL, \
EMBEDDING_MODEL and CHAT_MODEL override the endpoint and models.

Press Ctrl-C to stop after the section in progress; completed sections are kept.

EXAMPLES:
  Run an outline file:
    outline run --outline-file outline.md

  Run with a tuning file and draft the review:
    outline run --outline-file outline.md --config pipeline.toml --review

  Redraft the review for an earlier run:
    outline review outline_results"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Logging verbosity level
    #[arg(long, default_value = "info", value_name = "LEVEL", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline over an outline
    Run(RunArgs),

    /// Draft review text from the block files of an earlier run
    Review(ReviewArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// File holding the outline text
    #[arg(long, value_name = "FILE", conflicts_with = "outline", required_unless_present = "outline")]
    outline_file: Option<PathBuf>,

    /// Outline text given inline
    #[arg(long, value_name = "TEXT")]
    outline: Option<String>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Draft review text once retrieval finishes
    #[arg(long)]
    review: bool,
}

#[derive(Args, Debug)]
struct ReviewArgs {
    /// Output directory of an earlier run
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

/// Settings that override the tuning file
#[derive(Args, Debug)]
struct ConfigOverrides {
    /// Pipeline tuning file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Abstract embedding store
    #[arg(long, value_name = "FILE")]
    abstract_store: Option<PathBuf>,

    /// Full-text embedding store
    #[arg(long, value_name = "FILE")]
    fulltext_store: Option<PathBuf>,

    /// Directory for block and aggregate result files
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Results kept per keyword
    #[arg(long, value_name = "N")]
    top_k: Option<usize>,

    /// Maximum number of references per drafted section
    #[arg(long, value_name = "N")]
    max_references: Option<usize>,

    /// Treat missing stores as empty instead of failing
    #[arg(long)]
    allow_missing_stores: bool,
}

impl ConfigOverrides {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("Failed to load pipeline config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(path) = &self.abstract_store {
            config.abstract_store = path.clone();
        }
        if let Some(path) = &self.fulltext_store {
            config.fulltext_store = path.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(top_k) = self.top_k {
            config.top_k_per_keyword = top_k;
        }
        if let Some(limit) = self.max_references {
            config.max_references = limit;
        }
        if self.allow_missing_stores {
            config.allow_missing_stores = true;
        }

        config.validate().context("Invalid pipeline configuration")?;
        Ok(config)
    }
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

fn build_pipeline(config: PipelineConfig, cancel: CancelFlag) -> Result<OutlinePipeline<OpenAIEmbedding, OpenAIChat>> {
    let settings = ApiSettings::from_env().context("Configuration error")?;
    info!(
        base_url = %settings.base_url,
        embedding_model = %settings.embedding_model,
        chat_model = %settings.chat_model,
        "Using model endpoint"
    );

    let embedder = OpenAIEmbedding::new(
        &settings.api_key,
        &settings.base_url,
        settings.embedding_model.clone(),
        settings.embedding_timeout,
        settings.max_retries,
    )
    .context("Failed to create embedding provider")?;
    let chat = OpenAIChat::new(
        &settings.api_key,
        &settings.base_url,
        settings.chat_model.clone(),
        settings.chat_timeout,
    )
    .context("Failed to create chat client")?;

    let decomposer = Box::new(LlmOutlineDecomposer::new(chat.clone()));
    Ok(OutlinePipeline::new(embedder, chat, decomposer, config).with_cancel_flag(cancel))
}

/// Cancel `flag` on the first Ctrl-C.
fn install_interrupt_handler(flag: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            flag.cancel();
        }
    });
}

fn print_run_summary(aggregate: &AggregateResult) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Block").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Keywords").add_attribute(Attribute::Bold),
        Cell::new("Abstracts").add_attribute(Attribute::Bold),
        Cell::new("Passages").add_attribute(Attribute::Bold),
    ]);

    for block in &aggregate.blocks_results {
        table.add_row(vec![
            Cell::new(block.block_index + 1),
            Cell::new(&block.block_info.title),
            Cell::new(block.enhanced_keywords.join(", ")),
            Cell::new(block.abstract_results.len()),
            Cell::new(block.fulltext_results.len()),
        ]);
    }

    println!("{}", table);
    println!(
        "Completed {} of {} blocks",
        aggregate.blocks_results.len(),
        aggregate.blocks_count
    );
}

fn print_review_summary(outcome: &ReviewOutcome) {
    println!("Drafted {} section(s)", outcome.block_reviews.len());
    if !outcome.failed_blocks.is_empty() {
        println!("Failed blocks: {:?}", outcome.failed_blocks);
    }
    match &outcome.merged_review {
        Some(path) => println!("Review written to {}", path.display()),
        None => println!("No review written"),
    }
    if outcome.cancelled {
        println!("Review generation was cancelled");
    }
}

async fn read_outline(args: &RunArgs) -> Result<String> {
    match (&args.outline, &args.outline_file) {
        (Some(text), _) => Ok(text.clone()),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read outline file {}", path.display())),
        (None, None) => anyhow::bail!("One of --outline or --outline-file must be specified"),
    }
}

async fn run(args: RunArgs, cancel: CancelFlag) -> Result<()> {
    let outline = read_outline(&args).await?;
    let config = args.overrides.resolve()?;
    let output_dir = config.output_dir.clone();
    let pipeline = build_pipeline(config, cancel.clone())?;

    let start = Instant::now();
    let outcome = pipeline.process_outline(&outline).await?;
    info!(elapsed = ?start.elapsed(), "Retrieval finished");

    print_run_summary(&outcome.aggregate);
    println!("Results written to {}", outcome.final_result_path.display());

    if outcome.cancelled {
        println!("Run was cancelled; skipping review");
        return Ok(());
    }

    if args.review {
        let review = pipeline.generate_review(&output_dir).await?;
        print_review_summary(&review);
    }
    Ok(())
}

async fn review(dir: &Path, overrides: &ConfigOverrides, cancel: CancelFlag) -> Result<()> {
    let config = overrides.resolve()?;
    let pipeline = build_pipeline(config, cancel)?;
    let outcome = pipeline.generate_review(dir).await?;
    print_review_summary(&outcome);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);
    debug!("CLI arguments: {:?}", cli);

    let cancel = CancelFlag::new();
    install_interrupt_handler(cancel.clone());

    match cli.command {
        Command::Run(args) => run(args, cancel).await,
        Command::Review(args) => review(&args.dir, &args.overrides, cancel).await,
    }
}

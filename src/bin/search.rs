//! Search binary entry point.
//!
//! Query an embedding store from the command line. Supports single queries,
//! lookup of passages similar to one already in the store, and an interactive
//! REPL, with table, JSON or plain-text output.
//!
//! # Examples
//!
//! Single query with default settings:
//! ```bash
//! search --store embeddings/abstract_embeddings.json --query "graph neural networks"
//! ```
//!
//! Passages similar to an existing one, as JSON:
//! ```bash
//! search --store embeddings/fulltext_embeddings.json --existing "Exact paragraph text" --format json
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --store embeddings/abstract_embeddings.json --interactive
//! ```

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use litreview_search::{
    config::ApiSettings,
    embedding::openai::OpenAIEmbedding,
    models::{RelevanceLevel, SearchResult},
    ranking::{RankingOptions, DEFAULT_THRESHOLD, DEFAULT_TOP_K},
    retrieval::RetrievalOrchestrator,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const PREVIEW_CHARS: usize = 200;

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table with colored relevance levels
    Table,
    /// Machine-readable JSON format
    Json,
    /// Plain-text report with previews
    Text,
}

/// Search binary CLI for querying an embedding store
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search an embedding store using semantic similarity",
    long_about = "Query an abstract or full-text embedding store by cosine similarity. Supports \
                  single queries, query-by-existing-passage and an interactive mode.

Queries are embedded with the model named by EMBEDDING_MODEL (default doubao-embedding-text-240715); \
the API key is read from ARK_API_KEY, DOUBAO_API_KEY or OPENAI_API_KEY.

EXAMPLES:
  Single query:
    search --store embeddings/abstract_embeddings.json --query \"graph neural networks\"

  Similar to an existing passage:
    search --store embeddings/fulltext_embeddings.json --existing \"Exact paragraph text\"

  Interactive mode:
    search --store embeddings/abstract_embeddings.json --interactive"
)]
struct Args {
    /// Embedding store file
    #[arg(long, value_name = "PATH", default_value = "embeddings/abstract_embeddings.json")]
    store: PathBuf,

    /// Search query
    #[arg(long, value_name = "TEXT", conflicts_with_all = ["interactive", "existing"])]
    query: Option<String>,

    /// Find passages similar to the store passage with exactly this text
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    existing: Option<String>,

    /// Number of results to return
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Only return results scoring strictly above this similarity
    #[arg(long, value_name = "SCORE", default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Build the query embedder from environment settings
fn create_embedding_provider() -> Result<OpenAIEmbedding> {
    let settings = ApiSettings::from_env().context("Cannot embed queries")?;
    info!(model = %settings.embedding_model, base_url = %settings.base_url, "Using embedding endpoint");
    OpenAIEmbedding::new(
        &settings.api_key,
        &settings.base_url,
        settings.embedding_model,
        settings.embedding_timeout,
        settings.max_retries,
    )
    .context("Failed to create embedding provider")
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    } else {
        flat
    }
}

fn relevance_label(level: RelevanceLevel) -> (&'static str, Color) {
    match level {
        RelevanceLevel::Identical => ("IDENTICAL", Color::Green),
        RelevanceLevel::HighlySimilar => ("HIGHLY_SIMILAR", Color::Cyan),
        RelevanceLevel::Similar => ("SIMILAR", Color::Yellow),
        RelevanceLevel::Relevant => ("RELEVANT", Color::White),
    }
}

/// Title, else file name, else nothing
fn source_label(result: &SearchResult) -> String {
    result
        .title()
        .or_else(|| result.metadata.get("file_name").map(String::as_str))
        .map(|s| preview(s, 60))
        .unwrap_or_else(|| "-".to_string())
}

/// Format results as a pretty table
fn format_results_table(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
        Cell::new("Relevance").add_attribute(Attribute::Bold),
        Cell::new("Source").add_attribute(Attribute::Bold),
        Cell::new("Text").add_attribute(Attribute::Bold),
    ]);

    for (idx, result) in results.iter().enumerate() {
        let (relevance_str, color) = relevance_label(result.relevance());
        table.add_row(vec![
            Cell::new(idx + 1),
            Cell::new(format!("{:.4}", result.similarity)),
            Cell::new(relevance_str).fg(color),
            Cell::new(source_label(result)),
            Cell::new(preview(&result.text, 80)),
        ]);
    }

    table.to_string()
}

/// Format results as a plain-text report
fn format_results_text(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut out = format!("Found {} similar passages:\n", results.len());
    for (idx, result) in results.iter().enumerate() {
        out.push_str(&format!("\n{}. Similarity: {:.4}\n", idx + 1, result.similarity));
        if let Some(title) = result.title() {
            out.push_str(&format!("   Title: {}\n", title));
        }
        if let Some(file_name) = result.metadata.get("file_name") {
            out.push_str(&format!("   File: {}\n", file_name));
        }
        out.push_str(&format!("   Text: {}\n", preview(&result.text, PREVIEW_CHARS)));
    }
    out
}

/// Format results as JSON
fn format_results_json(results: &[SearchResult]) -> Result<String> {
    serde_json::to_string_pretty(results).context("Failed to serialize results to JSON")
}

fn print_results(results: &[SearchResult], format: OutputFormat, elapsed_secs: f64) {
    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(results));
            println!("\nFound {} results in {:.2}s", results.len(), elapsed_secs);
        }
        OutputFormat::Text => println!("{}", format_results_text(results)),
        OutputFormat::Json => match format_results_json(results) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error formatting JSON: {}", e),
        },
    }
}

/// Display detailed view of a single result
fn display_result_detail(result: &SearchResult, rank: usize) {
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Score: {:.4}", result.similarity);
    println!("Relevance: {:?}", result.relevance());
    println!("Store index: {}", result.index);
    for (key, value) in &result.metadata {
        if key != "abstract" {
            println!("{}: {}", key, value);
        }
    }
    println!("\nText:\n{}", result.text);
    println!("{}", "═".repeat(80));
}

fn print_help() {
    println!("Commands:");
    println!("  <query>           - Search the store");
    println!("  /existing <text>  - Passages similar to the store passage with exactly this text");
    println!("  /top N            - Set number of results to N");
    println!("  /threshold T      - Set the similarity threshold to T");
    println!("  /format table     - Use table output format");
    println!("  /format json      - Use JSON output format");
    println!("  /format text      - Use plain-text output format");
    println!("  /detail N         - Show full details for result rank N");
    println!("  /help             - Show this help");
    println!("  Ctrl+D or Ctrl+C  - Exit");
}

/// Run interactive REPL mode
async fn run_interactive(
    retrieval: RetrievalOrchestrator<OpenAIEmbedding>,
    store: &Path,
    mut options: RankingOptions,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Literature Search ({})", store.display());
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut last_results: Vec<SearchResult> = Vec::new();

    loop {
        let line = match rl.readline("Search> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rl.add_history_entry(line).ok();

        if let Some(command) = line.strip_prefix('/') {
            let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
            let rest = rest.trim();
            match name {
                "help" => print_help(),
                "top" => match rest.parse::<usize>() {
                    Ok(n) if n > 0 => {
                        options.top_k = n;
                        println!("Set top-k to {}", n);
                    }
                    _ => eprintln!("Usage: /top N (positive integer)"),
                },
                "threshold" => match rest.parse::<f32>() {
                    Ok(t) if (-1.0..=1.0).contains(&t) => {
                        options.threshold = t;
                        println!("Set threshold to {}", t);
                    }
                    _ => eprintln!("Usage: /threshold T (between -1 and 1)"),
                },
                "format" => match rest {
                    "table" => format = OutputFormat::Table,
                    "json" => format = OutputFormat::Json,
                    "text" => format = OutputFormat::Text,
                    _ => eprintln!("Usage: /format [table|json|text]"),
                },
                "detail" => match rest.parse::<usize>() {
                    Ok(rank) if rank > 0 && rank <= last_results.len() => {
                        display_result_detail(&last_results[rank - 1], rank);
                    }
                    Ok(rank) if rank > last_results.len() => {
                        eprintln!(
                            "Rank {} out of range (last search had {} results)",
                            rank,
                            last_results.len()
                        );
                    }
                    _ => eprintln!("Usage: /detail N"),
                },
                "existing" if !rest.is_empty() => {
                    let start = Instant::now();
                    last_results = retrieval.search_by_existing_text(rest, store, &options).await;
                    print_results(&last_results, format, start.elapsed().as_secs_f64());
                }
                "existing" => eprintln!("Usage: /existing <exact passage text>"),
                _ => eprintln!("Unknown command: /{}. Type /help for available commands.", name),
            }
        } else {
            let start = Instant::now();
            last_results = retrieval.search_by_text(line, store, &options).await;
            print_results(&last_results, format, start.elapsed().as_secs_f64());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);
    debug!("CLI arguments: {:?}", args);

    if !args.interactive && args.query.is_none() && args.existing.is_none() {
        anyhow::bail!(
            "One of --query, --existing or --interactive must be specified.\n\
             Use --help for usage information."
        );
    }
    if !(-1.0..=1.0).contains(&args.threshold) {
        anyhow::bail!("Threshold must be between -1 and 1, got {}", args.threshold);
    }
    if !args.store.exists() {
        anyhow::bail!(
            "Embedding store not found: {}\n\
             Please run the ingestion binary first to build it.",
            args.store.display()
        );
    }

    let options = RankingOptions::new(args.top_k, args.threshold);

    if let Some(text) = &args.existing {
        let store = litreview_search::EmbeddingStore::load(&args.store)
            .await
            .with_context(|| format!("Failed to load {}", args.store.display()))?;
        let start = Instant::now();
        let results = litreview_search::retrieval::search_similar_to_record(&store, text, &options);
        if store.find_by_text(text).is_none() {
            eprintln!("No passage in the store has exactly that text.");
        }
        print_results(&results, args.format, start.elapsed().as_secs_f64());
        return Ok(());
    }

    let retrieval = RetrievalOrchestrator::new(create_embedding_provider()?);

    match args.query {
        Some(query) => {
            let start = Instant::now();
            let results = retrieval.search_by_text(&query, &args.store, &options).await;
            print_results(&results, args.format, start.elapsed().as_secs_f64());
        }
        None => run_interactive(retrieval, &args.store, options, args.format).await?,
    }

    Ok(())
}

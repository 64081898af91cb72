use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use docqa_core::config::{resolve_with_base, Config, Settings};
use docqa_embed::get_default_embedder;
use docqa_retriever::{JsonlHistory, QueryProcessor, Retriever, RetrieverConfig};

/// Ask questions about a folder of documents.
#[derive(Parser, Debug)]
#[command(name = "docqa", author, version, about, long_about = None)]
struct Cli {
    /// Configuration file; relative paths inside it resolve against its directory
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split, embed and index every supported file in the document directory
    Ingest {
        /// Override `paths.docs_dir`
        #[arg(long)]
        docs_dir: Option<PathBuf>,
    },
    /// Print the chunks nearest to a query
    Query {
        text: String,
        /// Number of chunks (defaults to `retrieval.top_k`)
        #[arg(short)]
        k: Option<usize>,
    },
    /// Answer a question from the indexed documents
    Ask {
        question: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Show past questions and answers, newest first
    History,
    /// Show how many documents and chunks are indexed
    Stats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load_from(&cli.config).context("loading configuration")?;
    let settings = config.settings()?;
    let base = cli.config.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));

    let mut retriever_config = RetrieverConfig::from_settings(&settings);
    retriever_config.docs_dir = resolve_with_base(base, &settings.paths.docs_dir);
    retriever_config.data_dir = resolve_with_base(base, &settings.paths.data_dir);
    let history_path = resolve_with_base(base, &settings.paths.history_file);

    match cli.command {
        Command::Ingest { docs_dir } => {
            if let Some(dir) = docs_dir {
                retriever_config.docs_dir = dir;
            }
            ingest(&settings, retriever_config)
        }
        Command::Query { text, k } => {
            let Some(retriever) = open_index(&settings, retriever_config)? else { return Ok(()) };
            let k = k.unwrap_or(retriever.config().top_k);
            let hits = retriever.get_relevant_chunks(&text, k)?;
            if hits.is_empty() {
                println!("No matching chunks.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!("{}. {} (distance {:.4})", rank + 1, hit.source, hit.distance);
                println!("   {}\n", hit.content.trim().replace('\n', "\n   "));
            }
            Ok(())
        }
        Command::Ask { question, k } => {
            let Some(retriever) = open_index(&settings, retriever_config)? else { return Ok(()) };
            let k = k.unwrap_or(retriever.config().top_k);
            let chunks = retriever.get_relevant_chunks(&question, k)?;
            let processor = QueryProcessor::from_settings(&settings.generation, Box::new(JsonlHistory::new(history_path)));
            let answer = processor.process_query(&question, &chunks)?;
            println!("{}", answer.answer.trim_end());
            if !answer.sources.is_empty() {
                println!("\nSources: {}", answer.sources.join(", "));
            }
            Ok(())
        }
        Command::History => {
            let records = JsonlHistory::new(history_path).load()?;
            if records.is_empty() {
                println!("No questions asked yet.");
            }
            for record in records.iter().rev() {
                println!("[{}] Q: {}\nA: {}\n", record.timestamp, record.question, record.answer);
            }
            Ok(())
        }
        Command::Stats => {
            let Some(retriever) = open_index(&settings, retriever_config)? else { return Ok(()) };
            let stats = retriever.stats();
            println!("Processed documents: {}", stats.sources);
            println!("Total chunks: {}", stats.chunks);
            Ok(())
        }
    }
}

fn ingest(settings: &Settings, config: RetrieverConfig) -> Result<()> {
    let docs_dir = config.docs_dir.clone();
    let mut retriever = Retriever::new(get_default_embedder(&settings.embedding)?, config)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("Processing documents in {}", docs_dir.display()));
    spinner.enable_steady_tick(Duration::from_millis(120));
    let report = retriever.process_documents();
    spinner.finish_and_clear();

    let report = report?;
    if report.skipped {
        println!("Nothing to ingest in {}", docs_dir.display());
    } else {
        println!("Indexed {} chunks from {} documents", report.chunks, report.sources);
        if report.truncated > 0 {
            println!("{} chunks are longer than the embedding model reads and were cut short", report.truncated);
        }
    }
    Ok(())
}

/// A retriever with the persisted index loaded, or `None` after telling the
/// user to ingest first.
fn open_index(settings: &Settings, config: RetrieverConfig) -> Result<Option<Retriever>> {
    let mut retriever = Retriever::new(get_default_embedder(&settings.embedding)?, config)?;
    if !retriever.load_processed_data() {
        println!("No processed documents found. Run `docqa ingest` first.");
        return Ok(None);
    }
    Ok(Some(retriever))
}

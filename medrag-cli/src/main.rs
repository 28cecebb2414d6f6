//! `medrag`: build a literature index and ask it questions.
//!
//! ```text
//! medrag ingest --source articles.json
//! medrag ask "心筋梗塞の治療法は？" --top-k 5
//! medrag status
//! ```

mod backends;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use medrag::{
    Backend, IngestReport, JsonFileSource, MedicalRag, MedragConfig, OllamaGenerator,
    RagResponse, RetryingSource,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "medrag", version, about = "Question answering over biomedical literature")]
struct Cli {
    /// JSON configuration file; environment variables are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load articles from a JSON dump into the index
    Ingest {
        /// Literature dump: a JSON object with an "articles" array
        #[arg(long)]
        source: PathBuf,

        /// Only ingest these PMIDs
        #[arg(long = "id", value_name = "PMID")]
        ids: Vec<String>,

        /// Drop every existing entry first
        #[arg(long)]
        reset: bool,

        /// Keep medical abbreviations as written
        #[arg(long)]
        no_expand: bool,
    },
    /// Answer a question from the indexed literature
    Ask {
        question: String,

        /// Passages to retrieve; defaults to the configured value
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum similarity in [-1, 1]; defaults to the configured value
        #[arg(short, long, allow_negative_numbers = true)]
        threshold: Option<f32>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what the index holds
    Status,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MedragConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            MedragConfig::from_json(&raw)?
        }
        None => MedragConfig::from_env()?,
    };
    Ok(config)
}

async fn build_rag(config: &MedragConfig, source: Option<JsonFileSource>) -> anyhow::Result<MedicalRag> {
    let mut builder = MedicalRag::builder()
        .config(config.clone())
        .embedding_provider(backends::embedding_provider(config)?)
        .llm(backends::llm(config)?)
        .vector_store(backends::vector_store(config).await?);
    if let Some(source) = source {
        builder = builder.source(Arc::new(RetryingSource::new(source, 3, Duration::from_millis(500))));
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Ingest { source, ids, reset, no_expand } => {
            let source = JsonFileSource::load(&source, !no_expand)
                .await
                .with_context(|| format!("loading articles from {}", source.display()))?;
            let rag = build_rag(&config, Some(source)).await?;
            if reset {
                rag.ingestion().reset().await?;
                info!("index reset");
            }
            let report = if ids.is_empty() {
                rag.ingestion().ingest_all().await?
            } else {
                rag.ingestion().ingest_batch(&ids).await?
            };
            print_report(&report);
        }
        Command::Ask { question, top_k, threshold, json } => {
            let rag = build_rag(&config, None).await?;
            let top_k = top_k.unwrap_or(config.top_k);
            let response = rag.ask_with(&question, top_k, threshold).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Command::Status => {
            let rag = build_rag(&config, None).await?;
            let status = rag.status().await?;
            println!("index:      {}", config.index_path.display());
            println!("entries:    {}", status.entries);
            println!("documents:  {}", status.documents);
            match &status.manifest {
                Some(m) => println!("embeddings: {} ({} dims)", m.embedding_model, m.dimensions),
                None => println!("embeddings: none recorded"),
            }
            println!("llm:        {} via {:?}", config.llm_model, config.llm_backend);
            if config.llm_backend == Backend::Ollama {
                let ollama =
                    OllamaGenerator::new(&config.llm_base_url, &config.llm_model, config.generation_timeout())?;
                match ollama.list_models().await {
                    Ok(models) => println!("available:  {}", models.join(", ")),
                    Err(e) => warn!(error = %e, "could not list Ollama models"),
                }
            }
        }
    }

    Ok(())
}

fn print_report(report: &IngestReport) {
    println!(
        "processed {} documents, wrote {} chunks ({} blank chunks skipped)",
        report.processed, report.chunks_written, report.skipped_chunks
    );
    for failure in &report.failed {
        println!("  failed {}: {}", failure.id, failure.reason);
    }
}

fn print_response(response: &RagResponse) {
    if response.degraded {
        println!("note: the question could not be translated; searched with it as written\n");
    }
    println!("{}\n", response.answer);
    if response.no_evidence {
        return;
    }

    println!("Sources:");
    for (n, c) in response.citations.iter().enumerate() {
        let authors = match c.authors.as_slice() {
            [] => String::new(),
            [only] => format!(" {only}."),
            [first, ..] => format!(" {first} et al."),
        };
        println!("  [{}] PMID {} {}.{} {} ({})  score {:.3}", n + 1, c.document_id, c.title, authors, c.venue, c.published, c.score);
        if let Some(doi) = &c.doi {
            println!("      https://doi.org/{doi}");
        }
    }
    if response.dropped_passages > 0 {
        println!("  ({} lower-ranked passages did not fit the prompt)", response.dropped_passages);
    }
    info!(
        translation_ms = response.translation_ms,
        search_ms = response.search_ms,
        generation_ms = response.generation_ms,
        total_ms = response.total_ms,
        "done"
    );
}

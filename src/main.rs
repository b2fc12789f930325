use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use churniq::config::Config;
use churniq::copilot::Copilot;
use churniq::corpus::SectionIndex;
use churniq::corpus::builder::{CorpusBuilder, persist_corpus};
use churniq::data::AppData;
use churniq::embedder::mock::MockEmbedder;
use churniq::embedder::openai::OpenAiEmbedder;
use churniq::embedder::Embedder;
use churniq::llm::OpenAiCompletions;
use churniq::retriever::Retriever;

#[derive(Parser)]
#[command(name = "churniq", version, about = "ChurnIQ Strategy Copilot core")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk and embed a knowledge document into a corpus artifact
    BuildCorpus {
        /// Markdown knowledge document
        #[arg(long)]
        source: PathBuf,

        /// Section index JSON (array of {section_id, title, tags, summary})
        #[arg(long)]
        index: PathBuf,

        /// Output directory for the corpus and metadata artifacts
        #[arg(long, default_value = "./rag/v2")]
        out_dir: PathBuf,

        /// Corpus artifact filename
        #[arg(long, default_value = "churn_corpus.json")]
        filename: String,
    },

    /// Ask the copilot one question and print the answer
    Ask {
        /// The question to answer
        question: String,

        /// Directory of dataset fixtures; the built-in reference dataset
        /// is used when omitted
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    config.validate()?;

    match cli.command {
        Command::BuildCorpus {
            source,
            index,
            out_dir,
            filename,
        } => build_corpus(&config, &source, &index, &out_dir, &filename).await,
        Command::Ask { question, data_dir } => ask(&config, &question, data_dir.as_deref()).await,
    }
}

fn make_embedder(config: &Config) -> Arc<dyn Embedder> {
    match config.completion.api_key.as_deref() {
        Some(key) if !key.is_empty() => Arc::new(OpenAiEmbedder::new(
            &config.embedding.base_url,
            key,
            &config.embedding.model,
            3072,
        )),
        _ => {
            warn!("no API key configured, using the deterministic mock embedder");
            Arc::new(MockEmbedder::default())
        }
    }
}

async fn build_corpus(
    config: &Config,
    source: &std::path::Path,
    index: &std::path::Path,
    out_dir: &std::path::Path,
    filename: &str,
) -> Result<()> {
    let markdown = std::fs::read_to_string(source)
        .with_context(|| format!("reading source document {}", source.display()))?;
    let index: Vec<SectionIndex> = serde_json::from_str(
        &std::fs::read_to_string(index)
            .with_context(|| format!("reading section index {}", index.display()))?,
    )
    .context("parsing section index")?;

    info!(sections = index.len(), "building corpus");

    let embedder = make_embedder(config);
    let builder = CorpusBuilder::new(
        embedder.as_ref(),
        config.chunking.target_tokens,
        config.chunking.overlap_tokens,
        config.embedding.batch_size,
        config.embedding.batch_delay_ms,
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("chunking and embedding...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    let corpus = builder.build(&markdown, index).await?;
    spinner.finish_with_message("embedding complete");

    let metadata = persist_corpus(&corpus, out_dir, filename)?;
    println!(
        "Corpus built: {} chunks, {} sections, {} tokens ({})",
        metadata.chunk_count, metadata.section_count, metadata.total_tokens, metadata.model
    );
    Ok(())
}

async fn ask(config: &Config, question: &str, data_dir: Option<&std::path::Path>) -> Result<()> {
    let data = match data_dir {
        Some(dir) => AppData::load_dir(dir)?,
        None => AppData::reference(),
    };

    let retriever = Arc::new(Retriever::new(
        &config.corpus_path,
        make_embedder(config),
        config.retrieval_top_k,
        config.retrieval_min_score,
    ));

    let provider = OpenAiCompletions::from_config(&config.completion)
        .map(|p| Arc::new(p) as Arc<dyn churniq::llm::CompletionProvider>);
    if provider.is_none() {
        info!("no completion provider configured, running in deterministic mode");
    }

    let copilot = Copilot::new(
        Arc::new(data),
        retriever,
        provider,
        config.completion.planner_timeout_ms,
    );

    let answer = copilot.ask(question).await;

    println!("Q: {question}\n");
    println!("A: {}\n", answer.text);
    println!("Citations:");
    for citation in &answer.citations {
        println!("  - {}: {}", citation.source, citation.r#ref);
    }
    if let Some(chart) = &answer.chart {
        let points = chart.series.first().map_or(0, |s| s.data.len());
        println!("\nChart: {:?} \"{}\" ({points} points)", chart.kind, chart.title);
    }
    println!("\nFollow-ups:");
    for follow_up in &answer.follow_ups {
        println!("  - {follow_up}");
    }

    Ok(())
}

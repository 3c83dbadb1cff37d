use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use ragdoc_core::config::Settings;
use ragdoc_pipeline::{document_names, Pipeline};

#[derive(Parser)]
#[command(name = "ragdoc", about = "Ask questions about a folder of documents")]
struct Cli {
    /// Overrides `documents_dir` from the configuration.
    #[arg(long, global = true)]
    documents_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index the documents directory and report the chunk count.
    Ingest,
    /// Answer a question from the indexed documents.
    Ask { question: String },
    /// Show the chunks retrieved for a query.
    Query {
        text: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// List the documents that would be ingested.
    Documents,
    /// Print the effective settings (credentials redacted).
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ragdoc_cli::init_tracing();
    let cli = Cli::parse();
    let mut settings = Settings::load().context("loading settings")?;
    if let Some(dir) = cli.documents_dir {
        settings.documents_dir = dir.to_string_lossy().to_string();
    }

    if let Command::Config = cli.command {
        settings.pipeline = settings.pipeline.redacted();
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }
    if let Command::Documents = cli.command {
        for file in document_names(&settings.documents_path())? {
            println!("{}", file);
        }
        return Ok(());
    }

    let k_default = settings.retrieval.k;
    let pipeline = initialize(settings).await?;
    match cli.command {
        Command::Ingest => {
            let status = pipeline.status();
            println!("Indexed {} chunks into {} (version {})", status.chunks, status.index_table, status.version);
        }
        Command::Ask { question } => {
            let answer = pipeline.ask(&question).await?;
            println!("{}", answer.response.trim());
            if answer.truncated {
                println!("\n(context truncated to fit the model window)");
            }
            println!("\nSources:");
            for source in &answer.sources {
                println!("  [{:.3}] {} p.{}", source.score, source.chunk.doc_name, source.chunk.page);
            }
        }
        Command::Query { text, k } => {
            let hits = pipeline.retrieve(&text, k.unwrap_or(k_default)).await?;
            for (rank, hit) in hits.iter().enumerate() {
                let preview: String = hit.chunk.text.chars().take(120).collect();
                println!("{:>2}. [{:.3}] {}  {}", rank + 1, hit.score, hit.chunk.id, preview.replace('\n', " "));
            }
        }
        Command::Documents | Command::Config => {}
    }
    Ok(())
}

async fn initialize(settings: Settings) -> anyhow::Result<Pipeline> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.set_message(format!("loading models and indexing {}", settings.documents_dir));
    spinner.enable_steady_tick(Duration::from_millis(120));
    let result = Pipeline::initialize(settings).await;
    spinner.finish_and_clear();
    result.context("initializing pipeline")
}

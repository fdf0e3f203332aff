use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use sqlrag::services::default_data_dir;
use sqlrag::{AiServices, AppConfig, Workspace};

#[derive(Parser)]
#[command(name = "sqlrag")]
#[command(about = "ask natural-language questions over an uploaded table", long_about = None)]
struct Cli {
    /// Data directory (default: the platform data dir)
    #[arg(long, global = true, env = "SQLRAG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a CSV, Excel or SQLite file as the active dataset
    Ingest {
        /// Dataset file (.csv, .xlsx, .xls, .db, .sqlite, .sqlite3)
        file: PathBuf,
    },
    /// Ask a question about the active dataset
    Ask {
        question: String,

        /// Skip the natural-language answer
        #[arg(long, default_value = "false")]
        no_answer: bool,
    },
    /// Print the indexed schema documents
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    sqlrag::init_tracing();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    let mut config = AppConfig::load(&data_dir)
        .with_context(|| format!("loading config from {}", data_dir.display()))?;
    if let Commands::Ask { no_answer: true, .. } = &cli.command {
        config.answer.enabled = false;
    }

    let ai = AiServices::from_config(&config).context("initializing model services")?;
    let workspace = Workspace::open(config, ai.embedder, ai.generator).await?;

    match cli.command {
        Commands::Ingest { file } => {
            let report = workspace
                .ingest(&file)
                .await
                .with_context(|| format!("ingesting {}", file.display()))?;
            print_json(&report)
        }
        Commands::Ask { question, .. } => {
            let response = workspace.ask(&question).await;
            print_json(&response)?;
            if !response.is_success() {
                std::process::exit(2);
            }
            Ok(())
        }
        Commands::Schema => {
            let documents = workspace.schema().await?;
            for document in &documents {
                println!("{}\n", document.to_text());
            }
            if documents.is_empty() {
                eprintln!("no active dataset; run `sqlrag ingest <file>` first");
            }
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

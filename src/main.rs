//! # Repo QA CLI (`rqa`)
//!
//! ## Usage
//!
//! ```bash
//! rqa --config ./config/rqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rqa init` | Create the SQLite database and schema |
//! | `rqa index [--force]` | Fetch the repository and index it |
//! | `rqa search "<query>"` | Print the nearest chunks |
//! | `rqa ask "<question>"` | Answer a question about the repository |
//! | `rqa stats` | Corpus summary |
//! | `rqa serve` | Start the HTTP API |
//!
//! Logs go to stderr. `RUST_LOG` overrides `[logging].level`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_qa::config::{self, LoggingConfig};
use repo_qa::service::QaService;
use repo_qa::{migrate, search, server, stats};

/// Ask questions about a code repository, answered from its own files.
#[derive(Parser)]
#[command(name = "rqa", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run more than once.
    Init,

    /// Fetch the repository and index its files.
    ///
    /// Without `--force` new chunks are added to the existing corpus;
    /// with it the corpus is purged first.
    Index {
        #[arg(long)]
        force: bool,
    },

    /// Similarity search over indexed chunks, without answer synthesis.
    Search {
        query: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Answer a question about the repository.
    Ask {
        query: String,

        #[arg(long)]
        json: bool,
    },

    /// Show corpus statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { force } => {
            let service = QaService::build(cfg).await?;
            let stats = service.index_now(force).await?;
            println!(
                "Indexed {}/{} files into {} chunks in {:.1}s ({:.1} files/s, {:.1} chunks/s)",
                stats.processed_files,
                stats.total_files,
                stats.total_chunks,
                stats.duration_seconds,
                stats.files_per_second,
                stats.chunks_per_second
            );
            if stats.failed_files() > 0 {
                println!("{} file(s) skipped; see log for details.", stats.failed_files());
            }
        }
        Commands::Search { query, k, json } => {
            search::run_search(&cfg, &query, k, json).await?;
        }
        Commands::Ask { query, json } => {
            search::run_ask(&cfg, &query, json).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
    }

    Ok(())
}

//! ragdesk CLI: the main entry point.
//!
//! Commands:
//! - `serve`   : Start the HTTP chat API
//! - `chat`    : Interactive or single-message chat in the terminal
//! - `ingest`  : Chunk, embed and upload a document directory to Qdrant
//! - `init`    : Write a default config file
//! - `doctor`  : Diagnose configuration and connectivity

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ragdesk_config::AppConfig;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "ragdesk",
    about = "ragdesk: retrieval-augmented chat over your documents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "RAGDESK_LOG_JSON")]
    log_json: bool,

    /// Config file (default: ~/.ragdesk/config.toml)
    #[arg(short, long, global = true, env = "RAGDESK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP chat API
    Serve {
        /// Override the bind address
        #[arg(long)]
        host: Option<String>,

        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Use a process-local store filled from `ingest.data_dir` instead of Qdrant
        #[arg(long)]
        in_memory: bool,
    },

    /// Chat in the terminal
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Use a process-local store filled from `ingest.data_dir` instead of Qdrant
        #[arg(long)]
        in_memory: bool,
    },

    /// Ingest a document directory into the Qdrant collection
    Ingest {
        /// Directory to ingest (default: `ingest.data_dir`)
        dir: Option<PathBuf>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Diagnose configuration and connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let config_path = cli
        .config
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    match cli.command {
        Commands::Serve {
            host,
            port,
            in_memory,
        } => commands::serve::run(load_config(&config_path)?, host, port, in_memory).await?,
        Commands::Chat { message, in_memory } => {
            commands::chat::run(load_config(&config_path)?, message, in_memory).await?
        }
        Commands::Ingest { dir } => commands::ingest::run(load_config(&config_path)?, dir).await?,
        Commands::Init { force } => commands::init::run(&config_path, force)?,
        Commands::Doctor => commands::doctor::run(&config_path).await?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load_with_env(path).map_err(|e| format!("Failed to load config: {e}"))?)
}

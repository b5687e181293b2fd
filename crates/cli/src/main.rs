//! Forgehand CLI — the main entry point.
//!
//! Commands:
//! - `serve`      — Gateway plus Telegram (when enabled)
//! - `gateway`    — HTTP/WebSocket gateway only
//! - `telegram`   — Telegram bot only
//! - `checkpoint` — Show or clear the saved task checkpoint
//! - `status`     — Show the effective configuration
//! - `init`       — Write a default config file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "forgehand",
    about = "Forgehand — a self-hosted coding agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.forgehand/config.toml)
    #[arg(short, long, global = true, env = "FORGEHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway and, when enabled, the Telegram bot
    Serve,

    /// Run only the HTTP/WebSocket gateway
    Gateway {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run only the Telegram bot
    Telegram,

    /// Inspect the saved task checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show the effective configuration
    Status,

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the checkpoint, if any
    Show,
    /// Delete the checkpoint
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config_path = cli.config.unwrap_or_else(runtime::default_config_path);

    let load = || runtime::load_config(&config_path);
    match cli.command {
        Commands::Serve => commands::serve::run(load()?).await,
        Commands::Gateway { port } => commands::gateway::run(load()?, port).await,
        Commands::Telegram => commands::telegram::run(load()?).await,
        Commands::Checkpoint { action: CheckpointAction::Show } => commands::checkpoint::show(&load()?).await,
        Commands::Checkpoint { action: CheckpointAction::Clear } => commands::checkpoint::clear(&load()?).await,
        Commands::Status => commands::status::run(&load()?, &config_path).await,
        Commands::Init { force } => commands::init::run(&config_path, force),
    }
}

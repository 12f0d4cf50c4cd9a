//! playspawn - playbook-driven single-user server lifecycle
//!
//! Main entry point for the playspawn CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{config, poll, start, state, stop};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// playspawn - run a single-user server's lifecycle through Ansible playbooks
#[derive(Parser)]
#[command(name = "playspawn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file to use instead of discovery
    #[arg(short, long, global = true, env = "PLAYSPAWN_CONFIG")]
    pub config: Option<PathBuf>,

    /// User the server belongs to (default: $USER)
    #[arg(short, long, global = true, env = "PLAYSPAWN_USER")]
    pub user: Option<String>,

    /// Where the server state is persisted
    #[arg(long, global = true, env = "PLAYSPAWN_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create (and configure) the server, streaming progress
    Start(start::StartArgs),

    /// Destroy the server and forget its state
    Stop(stop::StopArgs),

    /// Check whether the server is still running
    Poll(poll::PollArgs),

    /// Print the persisted server state
    State(state::StateArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main Entry Point
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing: console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "playspawn=debug,playspawn_spawner=debug,playspawn_runner=debug,playspawn_config=debug,info"
    } else {
        "playspawn=info,playspawn_spawner=info,playspawn_runner=info,warn"
    };

    let log_dir = playspawn_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "playspawn.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "playspawn=trace,playspawn_spawner=trace,playspawn_runner=trace,playspawn_config=trace,info",
                )),
        )
        .init();

    // Create context for commands
    let ctx = commands::Context {
        config_path: cli.config,
        user: cli.user,
        state_file: cli.state_file,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await?,
        Commands::Stop(args) => stop::run(args, &ctx).await?,
        Commands::Poll(args) => return poll::run(args, &ctx).await,
        Commands::State(args) => state::run(args, &ctx).await?,
        Commands::Config(args) => config::run(args, &ctx).await?,
    }

    Ok(ExitCode::SUCCESS)
}

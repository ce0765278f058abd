//! Driftmap CLI - run the online projector against a live feed

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;
mod console;
mod mock;
mod plot;

#[derive(Parser)]
#[command(name = "driftmap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the projector with the mock feed and an interactive console
    Run {
        /// Path to the TOML configuration
        #[arg(short, long, default_value = "./driftmap.toml")]
        config: PathBuf,

        /// Write plotted points as JSON lines instead of logging them
        #[arg(short, long)]
        plot_output: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML configuration
        #[arg(short, long, default_value = "./driftmap.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            plot_output,
            duration,
        } => {
            commands::run::execute(config, plot_output, duration).await?;
        }
        Commands::CheckConfig { config } => {
            commands::check_config::execute(config)?;
        }
    }

    Ok(())
}

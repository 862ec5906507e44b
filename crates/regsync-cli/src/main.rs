mod commands;
mod logging;
mod wiring;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "regsync",
    version,
    about = "Incremental core-banking to regulatory-reporting sync"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true, env = "REGSYNC_LOG_LEVEL")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every configured endpoint until interrupted
    Run {
        /// Path to sync config YAML
        config: PathBuf,
    },
    /// Probe each source, the destination and the state backend once
    Check {
        /// Path to sync config YAML
        config: PathBuf,
    },
    /// Print the stored cursor of every configured table
    Cursors {
        /// Path to sync config YAML
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { config } => commands::run::execute(&config).await,
        Commands::Check { config } => commands::check::execute(&config).await,
        Commands::Cursors { config } => commands::cursors::execute(&config).await,
    }
}

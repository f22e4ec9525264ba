//! sheetpack CLI - asset pipeline and dev server for Pure JavaScript Excel.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sheetpack_bundle::Mode;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "sheetpack")]
#[command(about = "Asset pipeline and development server for Pure JavaScript Excel")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to sheetpack.toml config file
    #[arg(short, long, default_value = "sheetpack.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the application into the output directory (mode from NODE_ENV)
    Build,

    /// Start development server with hot module replacement
    Dev {
        /// Port to listen on (defaults to config or 8080)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,
    },

    /// Preview a finished build
    Preview {
        /// Port to listen on
        #[arg(short, long, default_value = "4000")]
        port: u16,

        /// Directory to serve (defaults to the configured output directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let mode = Mode::from_env();

    match cli.command {
        Commands::Build => {
            commands::build::run(&cli.config, mode).await?;
        }
        Commands::Dev { port, no_open } => {
            commands::dev::run(&cli.config, mode, port, !no_open).await?;
        }
        Commands::Preview { port, dir } => {
            commands::preview::run(&cli.config, mode, port, dir).await?;
        }
    }

    Ok(())
}

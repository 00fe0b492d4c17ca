use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use pipebridge_config::{BridgeConfig, ConfigError};
use pipebridge_core::Direction;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "pipebridge", version, about = "Bridge virtual files to host processes over named pipes")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a virtual file out through a named pipe
    Export {
        /// Virtual path to read
        path: String,
        /// FIFO to write to (a fresh one is generated if omitted)
        #[arg(short, long)]
        pipe: Option<PathBuf>,
        /// Lease a fixed path from the legacy pool instead
        #[arg(long, conflicts_with = "pipe")]
        legacy: bool,
    },
    /// Fill a virtual file from a named pipe
    Import {
        /// Virtual path to write
        path: String,
        /// FIFO to read from (a fresh one is generated if omitted)
        #[arg(short, long)]
        pipe: Option<PathBuf>,
        /// Lease a fixed path from the legacy pool instead
        #[arg(long, conflicts_with = "pipe")]
        legacy: bool,
    },
    /// Create FIFOs at the given paths
    Provision {
        /// Paths to create
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Fail if something already exists at a path
        #[arg(long)]
        fresh: bool,
    },
    /// Remove FIFOs (refuses anything that is not a FIFO)
    Remove {
        /// Paths to remove
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Provision every fixed path of the legacy pool
    Legacy,
    /// Show effective configuration
    Config,
    /// Validate the configuration file
    Validate,
}

fn find_config() -> Option<PathBuf> {
    // 1. PIPEBRIDGE_CONFIG environment variable
    if let Ok(path) = std::env::var("PIPEBRIDGE_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. pipebridge.yaml in current directory
    let cwd_config = PathBuf::from("pipebridge.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}

/// Load the configuration file, or fall back to built-in defaults.
fn load_config(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    match path {
        Some(path) => BridgeConfig::from_file(path),
        None => Ok(BridgeConfig::default()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli.config.or_else(find_config);

    match cli.command {
        Commands::Export { path, pipe, legacy } => {
            let config = load_config(config_path.as_deref())?;
            commands::session::run(config, Direction::Export, &path, pipe, legacy).await?;
        }
        Commands::Import { path, pipe, legacy } => {
            let config = load_config(config_path.as_deref())?;
            commands::session::run(config, Direction::Import, &path, pipe, legacy).await?;
        }
        Commands::Provision { paths, fresh } => {
            let config = load_config(config_path.as_deref())?;
            commands::provision::run(&config, &paths, fresh)?;
        }
        Commands::Remove { paths } => {
            let config = load_config(config_path.as_deref())?;
            commands::remove::run(&config, &paths)?;
        }
        Commands::Legacy => {
            let config = load_config(config_path.as_deref())?;
            commands::legacy::run(config)?;
        }
        Commands::Config => {
            let config = load_config(config_path.as_deref())?;
            commands::config::run(&config)?;
        }
        Commands::Validate => {
            let path = config_path.ok_or(
                "No configuration file found. Use --config, set PIPEBRIDGE_CONFIG, or create pipebridge.yaml",
            )?;
            commands::validate::run(&path)?;
        }
    }

    Ok(())
}

//! Shipyard CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(about = "Build front-end projects in containers and deploy them", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, short, global = true, env = "SHIPYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a project and deploy it
    Build(commands::build::BuildArgs),
    /// Validate a pipeline configuration
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "shipyard.kdl")]
        path: PathBuf,
    },
    /// Remove stale build directories
    Prune {
        /// Remove directories older than this many seconds
        #[arg(long, default_value = "86400")]
        max_age: u64,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Build(args) => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::build::run(config, args).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Prune { max_age } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::prune(&config, max_age).await?;
        }
    }

    Ok(())
}

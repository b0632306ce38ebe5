//! runqueue CLI and controller.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "runqueue")]
#[command(about = "Per-repository concurrency control for pipeline runs", long_about = None)]
struct Cli {
    /// Controller configuration file (defaults to ./runqueue.kdl if present)
    #[arg(long, env = "RUNQUEUE_CONFIG")]
    config: Option<PathBuf>,

    /// Only watch resources in this namespace
    #[arg(long, env = "RUNQUEUE_NAMESPACE")]
    namespace: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild queues from the cluster and admit pipeline runs as they arrive
    Controller,
    /// Rebuild queues from the cluster and print them
    Queues {
        /// Only show this repository (namespace/name)
        #[arg(long)]
        repository: Option<String>,
    },
    /// Validate a controller configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "runqueue.kdl")]
        path: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Controller => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::controller::run(config, cli.namespace).await?;
        }
        Commands::Queues { repository } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::queues::show(config, cli.namespace, repository).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}

//! amqp-output - Main Entry Point
//!
//! Reads newline-delimited events from stdin and publishes each one to the
//! configured AMQP brokers.

use amqp_output::observability::init_default_logging;
use amqp_output::{AmqpOutput, LapinBroker, LogEvent, OutputConfig};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DEFAULT_CONFIG_PATHS: &[&str] = &["amqp-output.toml", "config/amqp-output.toml"];

/// Multi-broker AMQP event publisher
#[derive(Parser)]
#[command(name = "amqp-output")]
#[command(about = "Publish newline-delimited events to a pool of AMQP brokers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish events read from stdin until EOF or a shutdown signal
    Run {
        /// Maximum events in flight at once
        #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..))]
        workers: u32,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting amqp-output v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { workers } => run_output(config, workers as usize).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<OutputConfig, Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or("No configuration file found. Use -c/--config or create amqp-output.toml")?,
    };

    info!("Loading configuration from: {}", path.display());
    Ok(OutputConfig::load_from_file(&path)?)
}

async fn run_output(
    config: OutputConfig,
    workers: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let broker = LapinBroker::new();
    let output = Arc::new(AmqpOutput::new(&config, &broker).await?);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let permits = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!(workers, "Reading events from stdin");

    loop {
        // a permit is taken before reading, so a full pool still sees signals
        let permit = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            permit = Arc::clone(&permits).acquire_owned() => permit?,
        };

        let line = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("End of input");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = Arc::clone(&output);
        tasks.spawn(async move {
            let event = LogEvent::from_line(&line);
            if let Err(e) = output.event(&event).await {
                warn!(error = %e, "Dropping event");
            }
            drop(permit);
        });

        // reap finished tasks so the set stays bounded
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Publish task panicked");
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Publish task panicked");
        }
    }

    output.shutdown().await;

    let snapshot = serde_json::to_string(&output.metrics())?;
    info!(metrics = %snapshot, "Application shutdown complete");
    Ok(())
}

fn handle_config_command(
    config: &OutputConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration is valid");
    Ok(())
}

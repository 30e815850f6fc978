//! Log anomaly detector CLI
//!
//! Consumes JSON log records from Kafka and indexes the anomalous ones into
//! OpenSearch.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use detector::{
    config,
    error::{AppError, Result},
    pipeline,
    services::{self, ProbeTarget},
};
use tokio_util::sync::CancellationToken;

/// Log anomaly detector
#[derive(Parser, Debug)]
#[command(
    name = "detector",
    version,
    about = "Streams log records from Kafka and indexes anomalies into OpenSearch"
)]
struct Cli {
    /// Path to the TOML configuration file (default: ./detector.toml if present)
    #[arg(short, long, env = "DETECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Broker bootstrap address, overrides config and KAFKA_BROKER
    #[arg(long, global = true)]
    broker: Option<String>,

    /// Destination index name, overrides config
    #[arg(long, global = true)]
    index: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the broker, then stream and index anomalies until interrupted
    Run,

    /// Wait until the broker accepts TCP connections, then exit
    Probe,

    /// Validate configuration and print the effective values
    Validate,
}

/// Initialize logging; `RUST_LOG` wins over the configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn watch_signals(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    log::info!("Shutdown requested");
    token.cancel();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(broker) = cli.broker {
        config.broker.bootstrap_servers = broker;
    }
    if let Some(index) = cli.index {
        config.index.index = index;
    }
    config.validate()?;

    init_logging(cli.verbose, &config.logging.level);
    log::info!("Detector {} starting...", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    match cli.command {
        Command::Run => match pipeline::run_detector(&config, &shutdown).await {
            Ok(stats) => log::info!("Detector stopped: {stats}"),
            Err(AppError::Cancelled(during)) => {
                log::info!("Detector stopped while {during}");
            }
            Err(e) => {
                log::error!("Detector failed: {e}");
                return Err(e);
            }
        },

        Command::Probe => {
            let target = ProbeTarget::from_bootstrap(&config.broker.bootstrap_servers)?;
            services::wait_for_broker(&target, &config.probe, &shutdown).await?;
            log::info!("Broker at {target} is reachable");
        }

        Command::Validate => {
            log::info!("✓ Config OK");
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

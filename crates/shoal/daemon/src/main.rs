//! Shoal daemon - per-unit control plane
//!
//! Drives one unit of a replicated document-database cluster:
//! - membership reconfiguration and replica-set bootstrap
//! - internal credentials and relation users
//! - certificates and backups
//!
//! Lifecycle events arrive as JSON lines on stdin; outcomes leave on stdout.

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shoal_daemon::{DaemonConfig, Driver};

/// Shoal daemon CLI
#[derive(Parser)]
#[command(name = "shoald")]
#[command(about = "Shoal daemon - replica-set control plane for one unit", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SHOAL_CONFIG")]
    config: Option<String>,

    /// Unit name, e.g. shoal/0
    #[arg(short, long, env = "SHOAL_UNIT")]
    unit: Option<String>,

    /// Address this unit is reachable on
    #[arg(short, long, env = "SHOAL_ADDRESS")]
    address: Option<String>,

    /// Log level
    #[arg(long, env = "SHOAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "SHOAL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .with_context(|| format!("loading configuration from {:?}", cli.config))?;

    // Override with CLI args
    if let Some(unit) = cli.unit {
        config.unit.name = unit;
    }
    if let Some(address) = cli.address {
        config.unit.address = address;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing; stdout carries outcomes, so logs go to stderr
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    tracing::info!(
        unit = %config.unit.name,
        address = %config.unit.address,
        replica_set = %config.reconfig.replica_set_name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting shoald"
    );

    let driver = Driver::new(&config).context("wiring unit agent")?;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    driver
        .run(stdin, tokio::io::stdout(), shutdown_signal())
        .await
        .context("control loop")?;

    tracing::info!("shoald stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

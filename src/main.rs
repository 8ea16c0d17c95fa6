//! Update Relay
//!
//! Long-polls origin bot APIs and relays updates to RabbitMQ.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                    UPDATE RELAY                      │
//!                 │                                                      │
//!                 │   Cohort (one task per token)                        │
//!                 │   ┌──────────────────────────────────────────────┐   │
//!   Origin API    │   │ PollingWorker                                │   │
//!   ◀─────────────┼───┤   gate ──▶ fetch ──▶ publish ────────────────┼───┼──▶ RabbitMQ (AMQP)
//!                 │   │    │                    │                    │   │
//!                 │   └────┼────────────────────┼────────────────────┘   │
//!                 │        ▼                    ▼                        │
//!                 │   store breaker        publish breaker               │
//!                 │        │                                             │
//!                 │        ▼                                             │
//!                 │   RateLimiter ──▶ admission store (memory / Redis)   │
//!                 │                                                      │
//!                 │   config · observability · lifecycle · resilience    │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use update_relay::config::{load_config, load_from_env, RelayConfig};
use update_relay::lifecycle::{prepare_publisher, prepare_store, wait_for_signal};
use update_relay::limiter::RateLimiter;
use update_relay::observability::{logging, metrics};
use update_relay::origin::{Origin, WorkerIdentity};
use update_relay::worker::{Cohort, WorkerSettings};

#[derive(Parser)]
#[command(name = "update-relay")]
#[command(about = "Relays origin bot updates to a message queue", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults plus environment when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path),
        None => load_from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.check_config {
        println!("Configuration OK: {} worker(s)", config.origin.tokens.len());
        return Ok(());
    }

    let _log_guard = logging::init_logging(&config.observability)?;
    tracing::info!("update-relay v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Fatal error");
        return Err(e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        origin = %config.origin.kind,
        workers = config.origin.tokens.len(),
        capacity = config.rate_limit.capacity,
        store = ?config.store.backend,
        window_secs = config.rate_limit.window_secs,
        queue = %config.publisher.queue,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = Arc::new(prepare_store(&config.store).await?);
    let limiter = RateLimiter::with_jitter(store, config.rate_limit.jitter_ratio);

    let publisher = Arc::new(prepare_publisher(&config.publisher).await?);

    let identities = config
        .origin
        .tokens
        .iter()
        .map(WorkerIdentity::new)
        .collect::<Vec<_>>();
    let origin_config = config.origin.clone();

    let cohort = Cohort::start(
        identities,
        |identity| Origin::from_config(identity, &origin_config),
        publisher.clone(),
        limiter,
        WorkerSettings::from_config(&config),
        Duration::from_secs(config.lifecycle.shutdown_timeout_secs),
    );

    let signal = wait_for_signal().await?;
    tracing::info!(signal = ?signal, "Shutdown signal received");

    let report = cohort.stop().await;
    for worker in report.crashed() {
        tracing::error!(identity = %worker.identity, outcome = ?worker.outcome, "Worker crashed during run");
    }
    publisher.close().await;

    Ok(())
}

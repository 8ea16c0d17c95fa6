//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Write to stdout and, optionally, daily rolling files
//!
//! # Design Decisions
//! - JSON format for production, human-readable format for development
//! - `RUST_LOG` wins over the configured level when set
//! - A separate `error.log` keeps only ERROR events

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::ObservabilityConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the non-blocking file writers alive; dropping it flushes them.
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &ObservabilityConfig) -> Result<LoggingGuard, LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    if config.log_json {
        layers.push(fmt::layer().json().with_writer(std::io::stdout).boxed());
    } else {
        layers.push(fmt::layer().with_writer(std::io::stdout).boxed());
    }

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)?;

        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "relay.log"));
        guards.push(guard);
        layers.push(fmt::layer().json().with_ansi(false).with_writer(writer).boxed());

        let (error_writer, error_guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "error.log"));
        guards.push(error_guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::ERROR)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    Ok(LoggingGuard { _guards: guards })
}

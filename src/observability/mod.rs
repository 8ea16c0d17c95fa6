//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Limiter, breakers, workers, cohort produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, rolling files)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Worker identity travels as a redacted token suffix, never the token
//! - Metrics are cheap and optional; an absent recorder is a no-op sink

pub mod logging;
pub mod metrics;

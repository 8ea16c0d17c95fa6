//! Worker subsystem.
//!
//! # Data Flow
//! ```text
//! Cohort::start(identities)
//!     → one supervised task per identity
//!         → PollingWorker::run
//!             gate (limiter via store breaker)
//!             → fetch (origin client)
//!             → publish (publisher via publish breaker)
//!
//! CohortHandle::stop()
//!     → Shutdown broadcast → workers finish their cycle
//!     → deadline broadcast → in-flight fetches abandoned, publishes awaited
//!     → every worker closes its origin (panics included) → CohortReport
//! ```
//!
//! # Design Decisions
//! - Workers share nothing but the admission store and the publisher
//! - Breakers are owned per worker
//! - A crashed worker is reported, never restarted

pub mod cohort;
pub mod polling;

pub use cohort::{Cohort, CohortHandle, CohortReport, WorkerOutcome, WorkerReport};
pub use polling::{
    PollingWorker, StopReason, WorkerPhase, WorkerSettings, WorkerStats, WorkerStatsSnapshot,
};

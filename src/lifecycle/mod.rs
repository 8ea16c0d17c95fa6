//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Admission store → Broker ready → Declare queue → Start cohort
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Workers finish cycle → Close origins
//!     → Close broker connection → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then store and broker, then workers
//! - Shutdown has a deadline: past it, fetches are abandoned and publishes
//!   awaited; only workers stuck elsewhere are aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::{wait_for_signal, ShutdownSignal};
pub use startup::{prepare_publisher, prepare_store, StartupError};

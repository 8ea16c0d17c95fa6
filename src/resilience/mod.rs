//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency (rate-limit store, publisher):
//!     → circuit_breaker.rs (fail fast while Open, trial calls while Half-Open)
//!     → the dependency call itself
//!         → retries.rs inside the collaborator (bounded attempts)
//!         → backoff.rs (exponential delay + jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Breakers are per dependency and per worker; state never crosses
//! - The breaker does not retry; retry budgets belong to collaborators
//! - Jittered backoff prevents thundering herd

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{
    BreakerError, BreakerPolicy, BreakerSnapshot, CircuitBreaker, CircuitState, Dependency,
};
pub use retries::{retry_with_backoff, RetriesExhausted, RetryPolicy};

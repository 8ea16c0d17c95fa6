//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → sections handed by value to each component at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no process-wide settings object
//! - All fields have defaults to allow minimal configs
//! - Secrets (tokens, broker and store URLs) can come from the environment
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::RelayConfig;
pub use schema::{
    BreakersConfig, CircuitBreakerConfig, LifecycleConfig, ObservabilityConfig, OriginConfig,
    PublisherConfig, RateLimitConfig, StoreBackend, StoreConfig, WorkerConfig,
};

//! Update relay library.
//!
//! Polls origin services on behalf of many bot tokens and relays each update
//! to a message queue, while a shared sliding-window rate limiter keeps the
//! whole cohort within the origin's quota.

pub mod config;
pub mod lifecycle;
pub mod limiter;
pub mod message;
pub mod observability;
pub mod origin;
pub mod publisher;
pub mod resilience;
pub mod worker;

pub use config::schema::RelayConfig;
pub use lifecycle::Shutdown;
pub use limiter::{MemoryStore, RateLimiter, RedisStore, Store};
pub use message::UpdateMessage;
pub use worker::{Cohort, CohortHandle, CohortReport};

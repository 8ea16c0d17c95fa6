//! Shared rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Worker gate phase:
//!     → sliding_window.rs wait_for_admission (sleep hint + jitter, bounded)
//!     → sliding_window.rs try_acquire
//!     → store.rs AdmissionStore
//!          eval_admission      (atomic script: purge, count, insert, expire)
//!          insert_and_count    (fallback transaction, rolled back on denial)
//!     → Store (selected by config)
//!          memory.rs      MemoryStore  (DashMap, per-key shard lock)
//!          redis_store.rs RedisStore   (Lua script / MULTI-EXEC on a sorted set)
//! ```
//!
//! # Design Decisions
//! - One quota pool per key; capacity and window belong to the key's policy
//! - Window state is mutated only inside the store, never read-then-written
//!   by the client
//! - The fallback path may over-count transiently but never over-admits
//! - Jitter desynchronizes workers woken by the same denial

pub mod memory;
pub mod redis_store;
pub mod sliding_window;
pub mod store;

use std::time::Duration;

use crate::config::{StoreBackend, StoreConfig};

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use sliding_window::{AdmissionOutcome, LimiterError, RateLimiter};
pub use store::{Admission, AdmissionStore, RateLimitPolicy, StoreError, WindowSnapshot};

/// Admission store selected from configuration.
#[derive(Debug, Clone)]
pub enum Store {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl Store {
    /// Build the configured store, connecting to Redis when selected.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        match config.backend {
            StoreBackend::Memory => Ok(Store::Memory(MemoryStore::new())),
            StoreBackend::Redis => RedisStore::connect(config).await.map(Store::Redis),
        }
    }

    pub fn backend(&self) -> StoreBackend {
        match self {
            Store::Memory(_) => StoreBackend::Memory,
            Store::Redis(_) => StoreBackend::Redis,
        }
    }
}

impl AdmissionStore for Store {
    async fn eval_admission(
        &self,
        key: &str,
        member: &str,
        policy: RateLimitPolicy,
    ) -> Result<Admission, StoreError> {
        match self {
            Store::Memory(store) => store.eval_admission(key, member, policy).await,
            Store::Redis(store) => store.eval_admission(key, member, policy).await,
        }
    }

    async fn insert_and_count(
        &self,
        key: &str,
        member: &str,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        match self {
            Store::Memory(store) => store.insert_and_count(key, member, window).await,
            Store::Redis(store) => store.insert_and_count(key, member, window).await,
        }
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        match self {
            Store::Memory(store) => store.remove_member(key, member).await,
            Store::Redis(store) => store.remove_member(key, member).await,
        }
    }
}

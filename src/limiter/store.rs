//! Admission store abstraction.
//!
//! # Responsibilities
//! - Own the per-key window of admitted entries
//! - Offer the atomic purge-count-insert-expire primitive (scripted path)
//! - Offer a transactional batch plus member removal (fallback path)
//!
//! # Design Decisions
//! - Window state is only ever mutated inside the store
//! - "now" is the store's clock, never the caller's
//! - Each entry carries a unique member id so a fallback rollback removes
//!   exactly the entry it inserted

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Capacity and window length of one quota pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Admissions allowed within any trailing `window`.
    pub capacity: u32,
    /// Sliding window length.
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self { capacity, window }
    }
}

/// Result of a single admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; `remaining` further admissions fit in the current window.
    Allowed { remaining: u32 },
    /// Denied; the oldest entry leaves the window after `retry_after`.
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    /// The wait hint of a denial, zero for an admission.
    pub fn retry_after(&self) -> Duration {
        match self {
            Admission::Allowed { .. } => Duration::ZERO,
            Admission::Denied { retry_after } => *retry_after,
        }
    }
}

/// State of a window right after a transactional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries inside the window, including the one just inserted.
    pub count: u32,
    /// Age of the oldest entry still inside the window.
    pub oldest_age: Option<Duration>,
}

/// Errors reported by an admission store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the outcome is unknown.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store cannot run the atomic admission script.
    #[error("atomic admission script not supported by store")]
    ScriptUnsupported,

    /// The store answered with something unexpected.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// A shared store holding sliding windows keyed by quota pool.
///
/// Implementations must execute each method as one atomic unit with respect
/// to other callers on the same key.
pub trait AdmissionStore: Send + Sync + 'static {
    /// Purge, count, conditionally insert `member`, and extend the expiry of
    /// `key` in a single atomic step.
    fn eval_admission(
        &self,
        key: &str,
        member: &str,
        policy: RateLimitPolicy,
    ) -> impl Future<Output = Result<Admission, StoreError>> + Send;

    /// Purge, unconditionally insert `member`, count, and extend the expiry
    /// of `key` as one transaction.
    fn insert_and_count(
        &self,
        key: &str,
        member: &str,
        window: Duration,
    ) -> impl Future<Output = Result<WindowSnapshot, StoreError>> + Send;

    /// Remove `member` from the window of `key`, if still present.
    fn remove_member(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Compute the denial hint from the age of the oldest entry.
///
/// Rounded up to whole milliseconds and never zero, so a caller sleeping on
/// it always lands past the oldest entry's expiry. Falls back to the full
/// window when the window is unexpectedly empty.
pub fn denial_hint(window: Duration, oldest_age: Option<Duration>) -> Duration {
    let wait = match oldest_age {
        Some(age) => window.saturating_sub(age),
        None => window,
    };
    let millis = wait.as_nanos().div_ceil(1_000_000).max(1);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

//! In-process admission store.
//!
//! Backs the shared windows with a `DashMap`. Every operation runs while
//! holding the key's shard lock, so purge, count, insert and expire form one
//! atomic unit for all workers of the process. No lock is held across an
//! `.await`.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::limiter::store::{
    denial_hint, Admission, AdmissionStore, RateLimitPolicy, StoreError, WindowSnapshot,
};

/// Admitted entries of one key, oldest first.
#[derive(Debug)]
struct Window {
    entries: VecDeque<(Instant, String)>,
    expires_at: Instant,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            entries: VecDeque::new(),
            expires_at: now,
        }
    }

    /// Drop everything at or before `now - window`, or the whole key once expired.
    fn purge(&mut self, now: Instant, window: Duration) {
        if now >= self.expires_at {
            self.entries.clear();
            return;
        }
        while let Some((at, _)) = self.entries.front() {
            if now.saturating_duration_since(*at) >= window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn insert(&mut self, now: Instant, member: &str, window: Duration) {
        self.entries.push_back((now, member.to_string()));
        self.expires_at = now + window;
    }

    fn count(&self) -> u32 {
        u32::try_from(self.entries.len()).unwrap_or(u32::MAX)
    }

    fn oldest_age(&self, now: Instant) -> Option<Duration> {
        self.entries
            .front()
            .map(|(at, _)| now.saturating_duration_since(*at))
    }
}

/// A concurrent, process-local [`AdmissionStore`].
///
/// Cloning is cheap and every clone shares the same windows.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    windows: Arc<DashMap<String, Window>>,
    scripting: bool,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a store supporting the atomic admission script.
    pub fn new() -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            scripting: true,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a store that rejects the scripted path, forcing callers onto
    /// the transactional fallback.
    pub fn without_scripting() -> Self {
        Self {
            scripting: false,
            ..Self::new()
        }
    }

    /// Mark the store reachable or unreachable. Unreachable stores fail every
    /// call with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries for `key` at this instant.
    pub fn window_len(&self, key: &str, window: Duration) -> u32 {
        let now = Instant::now();
        match self.windows.get_mut(key) {
            Some(mut w) => {
                w.purge(now, window);
                w.count()
            }
            None => 0,
        }
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionStore for MemoryStore {
    async fn eval_admission(
        &self,
        key: &str,
        member: &str,
        policy: RateLimitPolicy,
    ) -> Result<Admission, StoreError> {
        self.ensure_available()?;
        if !self.scripting {
            return Err(StoreError::ScriptUnsupported);
        }

        let now = Instant::now();
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::new(now));

        window.purge(now, policy.window);
        let count = window.count();

        if count < policy.capacity {
            window.insert(now, member, policy.window);
            Ok(Admission::Allowed {
                remaining: policy.capacity - count - 1,
            })
        } else {
            Ok(Admission::Denied {
                retry_after: denial_hint(policy.window, window.oldest_age(now)),
            })
        }
    }

    async fn insert_and_count(
        &self,
        key: &str,
        member: &str,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        self.ensure_available()?;

        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::new(now));

        entry.purge(now, window);
        entry.insert(now, member, window);

        Ok(WindowSnapshot {
            count: entry.count(),
            oldest_age: entry.oldest_age(now),
        })
    }

    async fn remove_member(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.ensure_available()?;

        if let Some(mut window) = self.windows.get_mut(key) {
            window.entries.retain(|(_, m)| m != member);
        }
        self.windows.remove_if(key, |_, w| w.entries.is_empty());
        Ok(())
    }
}

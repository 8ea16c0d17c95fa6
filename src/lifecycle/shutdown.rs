//! Shutdown coordination for the worker cohort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
/// Listeners created after the trigger observe it immediately.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    /// Set once `trigger` has been called.
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
            triggered: self.triggered.clone(),
            shutdown: false,
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's view of the shutdown signal.
pub struct ShutdownListener {
    rx: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
    shutdown: bool,
}

impl ShutdownListener {
    /// Non-blocking check.
    pub fn is_shutdown(&mut self) -> bool {
        if !self.shutdown && self.triggered.load(Ordering::SeqCst) {
            self.shutdown = true;
        }
        self.shutdown
    }

    /// Resolve once shutdown has been triggered. Cancel-safe.
    pub async fn recv(&mut self) {
        if self.is_shutdown() {
            return;
        }
        // Lagged and Closed both mean the coordinator is done with us.
        let _ = self.rx.recv().await;
        self.shutdown = true;
    }
}

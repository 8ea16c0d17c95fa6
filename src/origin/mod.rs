//! Origin subsystem: clients for the services updates are polled from.
//!
//! # Data Flow
//! ```text
//! PollingWorker (one per token):
//!     → Origin::open()                 (build HTTP client)
//!     → Origin::fetch_next_update()    (long-poll, one update at most)
//!         → tamtam.rs (GET updates, keep marker, mark_seen)
//!     → Origin::close()                (always, on teardown)
//! ```
//!
//! # Design Decisions
//! - The set of origins is closed: `Origin` is an enum selected by `OriginKind`
//! - Fetches are not breaker-wrapped; failures are counted and the cycle ends
//! - Clients are owned by exactly one worker, so methods take `&mut self`

pub mod identity;
pub mod tamtam;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use thiserror::Error;

use crate::config::OriginConfig;
use crate::message::UpdateMessage;

pub use identity::WorkerIdentity;
pub use tamtam::TamTamClient;

/// Supported origin families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    TamTam,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::TamTam => "tamtam",
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a single origin fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("origin client is not open")]
    NotOpen,

    #[error("origin request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("origin returned status {0}")]
    Status(u16),

    #[error("malformed origin response: {0}")]
    Decode(String),
}

/// A polled service, bound to one worker identity.
pub trait OriginClient: Send + Sync + 'static {
    fn kind(&self) -> OriginKind;

    fn identity(&self) -> &WorkerIdentity;

    /// Acquire transport resources. Called once before the first fetch.
    fn open(&mut self) -> impl Future<Output = Result<(), FetchError>> + Send;

    /// Release transport resources. Safe to call when not open.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Fetch at most one pending update.
    fn fetch_next_update(
        &mut self,
    ) -> impl Future<Output = Result<Option<UpdateMessage>, FetchError>> + Send;
}

/// Origin client selected from configuration.
pub enum Origin {
    TamTam(TamTamClient),
}

impl Origin {
    pub fn from_config(identity: WorkerIdentity, config: &OriginConfig) -> Self {
        match config.kind {
            OriginKind::TamTam => Origin::TamTam(TamTamClient::new(identity, config)),
        }
    }
}

impl OriginClient for Origin {
    fn kind(&self) -> OriginKind {
        match self {
            Origin::TamTam(client) => client.kind(),
        }
    }

    fn identity(&self) -> &WorkerIdentity {
        match self {
            Origin::TamTam(client) => client.identity(),
        }
    }

    async fn open(&mut self) -> Result<(), FetchError> {
        match self {
            Origin::TamTam(client) => client.open().await,
        }
    }

    async fn close(&mut self) {
        match self {
            Origin::TamTam(client) => client.close().await,
        }
    }

    async fn fetch_next_update(&mut self) -> Result<Option<UpdateMessage>, FetchError> {
        match self {
            Origin::TamTam(client) => client.fetch_next_update().await,
        }
    }
}

//! Queue publishing subsystem.
//!
//! # Data Flow
//! ```text
//! PollingWorker:
//!     → publish breaker (resilience::circuit_breaker)
//!     → Publisher::send(message, queue)
//!         → rabbit.rs (AMQP via lapin, publisher confirms, bounded retries)
//! ```
//!
//! # Design Decisions
//! - One publisher is shared by every worker (`Arc`)
//! - Retries happen inside `send`; the worker never retries a publish
//! - A message the broker could not route, or nacked, counts as a failure
//! - The AMQP link is opened lazily and rebuilt after it drops

pub mod rabbit;

use std::future::Future;
use thiserror::Error;

use crate::message::UpdateMessage;

pub use rabbit::RabbitPublisher;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<PublishError>,
    },

    #[error("message was not routed to any queue")]
    NotRouted,

    #[error("broker rejected the message")]
    Nacked,

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("broker did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid broker URI: {0}")]
    InvalidUrl(String),
}

/// Destination for relayed updates.
pub trait Publisher: Send + Sync + 'static {
    fn send(
        &self,
        message: &UpdateMessage,
        queue: &str,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

//! Message relayed from an origin to the queue.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::origin::OriginKind;

/// One update, shaped for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// Chat the update belongs to.
    pub chat_id: i64,

    /// Message text, when the update carries one.
    pub text: Option<String>,

    /// Display name of the user that triggered the update.
    pub chat_user_name: Option<String>,

    /// Origin the update was fetched from.
    pub origin: OriginKind,

    /// Unix timestamp (seconds) at which the relay received the update.
    pub received_at: u64,
}

impl UpdateMessage {
    /// Build a message stamped with the current time.
    pub fn new(
        origin: OriginKind,
        chat_id: i64,
        text: Option<String>,
        chat_user_name: Option<String>,
    ) -> Self {
        let received_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            chat_id,
            text,
            chat_user_name,
            origin,
            received_at,
        }
    }
}

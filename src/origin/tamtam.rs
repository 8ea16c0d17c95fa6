//! TamTam Bot API origin.
//!
//! # Responsibilities
//! - Long-poll `GET updates` with the worker's token, one update per poll
//! - Track the update marker between polls
//! - Shape the update into an [`UpdateMessage`]
//! - Acknowledge it with a best-effort `mark_seen`

use serde_json::{json, Value};
use std::time::Duration;

use crate::config::OriginConfig;
use crate::message::UpdateMessage;
use crate::origin::{FetchError, OriginClient, OriginKind, WorkerIdentity};

/// Updates requested per poll. The marker moves past the whole batch, so
/// anything above one would lose updates.
const POLL_LIMIT: u32 = 1;

/// Update types whose text lives in `message.body` (or a forwarded link).
const MESSAGE_UPDATE_TYPES: &[&str] = &[
    "message_edited",
    "message_callback",
    "message_created",
    "message_constructed",
];

pub struct TamTamClient {
    identity: WorkerIdentity,
    base_url: String,
    poll_timeout_secs: u64,
    request_timeout: Duration,
    /// `None` until `open()`.
    client: Option<reqwest::Client>,
    marker: Option<String>,
}

impl TamTamClient {
    pub fn new(identity: WorkerIdentity, config: &OriginConfig) -> Self {
        let mut base_url = config.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Self {
            identity,
            base_url,
            poll_timeout_secs: config.poll_timeout_secs,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            client: None,
            marker: None,
        }
    }

    /// Marker of the last received batch.
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn mark_seen(&self, client: &reqwest::Client, chat_id: i64) {
        let url = format!("{}chats/{}/actions", self.base_url, chat_id);
        let result = client
            .post(url)
            .query(&[("access_token", self.identity.token())])
            .json(&json!({ "action": "mark_seen" }))
            .timeout(self.request_timeout)
            .send()
            .await;

        if let Err(e) = result {
            tracing::warn!(identity = %self.identity, chat_id, error = %e, "mark_seen failed");
        }
    }
}

impl OriginClient for TamTamClient {
    fn kind(&self) -> OriginKind {
        OriginKind::TamTam
    }

    fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    async fn open(&mut self) -> Result<(), FetchError> {
        if self.client.is_none() {
            self.client = Some(reqwest::Client::builder().build()?);
            tracing::info!(identity = %self.identity, "TamTam client opened");
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::info!(identity = %self.identity, "TamTam client closed");
        }
    }

    async fn fetch_next_update(&mut self) -> Result<Option<UpdateMessage>, FetchError> {
        let client = self.client.clone().ok_or(FetchError::NotOpen)?;

        let mut query = vec![
            ("access_token", self.identity.token().to_string()),
            ("timeout", self.poll_timeout_secs.to_string()),
            ("limit", POLL_LIMIT.to_string()),
        ];
        if let Some(marker) = &self.marker {
            query.push(("marker", marker.clone()));
        }

        let response = client
            .get(format!("{}updates", self.base_url))
            .query(&query)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let batch: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        if let Some(marker) = marker_of(&batch) {
            self.marker = Some(marker);
        }

        let Some(update) = first_update(&batch) else {
            return Ok(None);
        };

        let Some(chat_id) = chat_id_of(update) else {
            tracing::debug!(
                identity = %self.identity,
                update_type = update_type_of(update).unwrap_or("unknown"),
                "Skipping update without chat id"
            );
            return Ok(None);
        };

        self.mark_seen(&client, chat_id).await;

        Ok(Some(UpdateMessage::new(
            OriginKind::TamTam,
            chat_id,
            text_of(update),
            user_name_of(update),
        )))
    }
}

fn first_update(batch: &Value) -> Option<&Value> {
    batch.get("updates")?.as_array()?.first()
}

/// Marker as sent back on the next poll; TamTam returns it as a number.
fn marker_of(batch: &Value) -> Option<String> {
    match batch.get("marker")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn update_type_of(update: &Value) -> Option<&str> {
    update.get("update_type")?.as_str()
}

fn chat_id_of(update: &Value) -> Option<i64> {
    update.pointer("/message/recipient/chat_id")?.as_i64()
}

/// Text from the message body, falling back to a forwarded or linked message.
fn body_or_link_text(message: &Value) -> Option<String> {
    message
        .pointer("/body/text")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .or_else(|| message.pointer("/link/message/text").and_then(Value::as_str))
        .map(str::to_string)
}

fn text_of(update: &Value) -> Option<String> {
    let update_type = update_type_of(update)?;

    if MESSAGE_UPDATE_TYPES.contains(&update_type) {
        return body_or_link_text(update.get("message")?);
    }

    match update_type {
        "message_construction_request" => update
            .pointer("/input/messages/0/text")
            .and_then(Value::as_str)
            .map(str::to_string),
        "message_chat_created" => body_or_link_text(update.pointer("/chat/pinned_message")?),
        _ => None,
    }
}

fn user_name_of(update: &Value) -> Option<String> {
    let name = if let Some(user) = update.get("user") {
        user.get("name")
    } else if let Some(callback) = update.get("callback") {
        callback.pointer("/user/name")
    } else if let Some(chat) = update.get("chat") {
        chat.pointer("/dialog_with_user/name")
    } else if let Some(message) = update.get("message") {
        message.pointer("/sender/name")
    } else {
        None
    };

    name.and_then(Value::as_str).map(str::to_string)
}

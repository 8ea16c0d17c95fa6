//! RabbitMQ publisher over AMQP 0.9.1.
//!
//! Messages go to the default exchange with the queue name as routing key,
//! persistent and mandatory, with a fresh UUID as message id. The channel
//! runs in confirm mode: `send` returns once the broker acked the message,
//! and a message returned as unroutable is reported as [`PublishError::NotRouted`].

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::schema::redact_url;
use crate::config::PublisherConfig;
use crate::message::UpdateMessage;
use crate::publisher::{PublishError, Publisher};
use crate::resilience::retries::{retry_with_backoff, RetriesExhausted, RetryPolicy};

const CONNECTION_NAME: &str = "update-relay";

/// An open connection and its confirm-mode channel.
struct Link {
    connection: Connection,
    channel: Channel,
}

impl Link {
    fn is_usable(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

pub struct RabbitPublisher {
    uri: AMQPUri,
    /// Broker URL with the password redacted, for logs.
    endpoint: String,
    timeout: Duration,
    retry: RetryPolicy,
    link: Mutex<Option<Link>>,
}

impl std::fmt::Debug for RabbitPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitPublisher")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RabbitPublisher {
    /// Parse the broker URI. No connection is made until first use.
    pub fn new(config: &PublisherConfig) -> Result<Self, PublishError> {
        let endpoint = redact_url(&config.url);
        let uri: AMQPUri = config
            .url
            .parse()
            .map_err(|_: String| PublishError::InvalidUrl(endpoint.clone()))?;

        Ok(Self {
            uri,
            endpoint,
            timeout: Duration::from_secs(config.request_timeout_secs),
            retry: RetryPolicy::fixed(config.max_retries, Duration::from_secs(config.backoff_secs)),
            link: Mutex::new(None),
        })
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, PublishError>
    where
        F: Future<Output = Result<T, lapin::Error>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(PublishError::from),
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        }
    }

    async fn connect(&self) -> Result<Link, PublishError> {
        let properties =
            ConnectionProperties::default().with_connection_name(CONNECTION_NAME.into());
        let connection = self
            .bounded(Connection::connect_uri(self.uri.clone(), properties))
            .await?;
        let channel = self.bounded(connection.create_channel()).await?;
        self.bounded(channel.confirm_select(ConfirmSelectOptions::default()))
            .await?;

        tracing::info!(broker = %self.endpoint, "Broker connection established");
        Ok(Link { connection, channel })
    }

    /// Channel of the current link, reconnecting when the link dropped.
    async fn channel(&self) -> Result<Channel, PublishError> {
        let mut link = self.link.lock().await;
        if let Some(current) = link.as_ref() {
            if current.is_usable() {
                return Ok(current.channel.clone());
            }
            tracing::warn!(broker = %self.endpoint, "Broker connection lost, reconnecting");
        }

        let fresh = self.connect().await?;
        let channel = fresh.channel.clone();
        *link = Some(fresh);
        Ok(channel)
    }

    /// Forget the current link so the next call reconnects.
    async fn invalidate(&self) {
        self.link.lock().await.take();
    }

    fn properties() -> BasicProperties {
        BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_message_id(Uuid::new_v4().to_string().into())
    }

    async fn publish_once(
        &self,
        queue: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), PublishError> {
        let channel = self.channel().await?;
        let options = BasicPublishOptions {
            mandatory: true,
            ..BasicPublishOptions::default()
        };

        let confirmed = async {
            let confirm = self
                .bounded(channel.basic_publish("", queue, options, payload, properties))
                .await?;
            self.bounded(confirm).await
        }
        .await;

        match confirmed {
            Ok(confirmation) => confirmation_result(confirmation),
            Err(e) => {
                self.invalidate().await;
                Err(e)
            }
        }
    }

    /// Connection check; never errors.
    pub async fn check(&self) -> bool {
        match self.channel().await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(broker = %self.endpoint, error = %e, "Broker health check failed");
                false
            }
        }
    }

    /// Block until a broker connection is established.
    pub async fn wait_until_ready(&self, policy: RetryPolicy) -> Result<(), PublishError> {
        retry_with_backoff(policy, "broker_readiness", move |_| self.channel())
            .await
            .map_err(exhausted)?;
        tracing::info!(broker = %self.endpoint, "Broker is ready");
        Ok(())
    }

    /// Declare a durable queue. Idempotent on the broker side.
    pub async fn declare_queue(&self, queue: &str) -> Result<(), PublishError> {
        let channel = self.channel().await?;
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.bounded(channel.queue_declare(queue, options, FieldTable::default()))
            .await?;

        tracing::info!(queue = %queue, broker = %self.endpoint, "Queue declared");
        Ok(())
    }

    /// Close the broker connection, if one is open.
    pub async fn close(&self) {
        let Some(link) = self.link.lock().await.take() else {
            return;
        };
        if !link.connection.status().connected() {
            return;
        }
        match self.bounded(link.connection.close(200, "relay shutting down")).await {
            Ok(()) => tracing::info!(broker = %self.endpoint, "Broker connection closed"),
            Err(e) => tracing::warn!(broker = %self.endpoint, error = %e, "Broker connection close failed"),
        }
    }
}

fn confirmation_result(confirmation: Confirmation) -> Result<(), PublishError> {
    match confirmation {
        Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
        Confirmation::Ack(Some(_)) => Err(PublishError::NotRouted),
        Confirmation::Nack(_) => Err(PublishError::Nacked),
    }
}

fn exhausted(e: RetriesExhausted<PublishError>) -> PublishError {
    PublishError::Exhausted {
        attempts: e.attempts,
        last: Box::new(e.last_error),
    }
}

impl Publisher for RabbitPublisher {
    async fn send(&self, message: &UpdateMessage, queue: &str) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(message)?;
        // One message id for every attempt, so consumers can deduplicate.
        let properties = Self::properties();

        let (payload, properties) = (payload.as_slice(), &properties);
        retry_with_backoff(self.retry, "publish", move |_| {
            self.publish_once(queue, payload, properties.clone())
        })
        .await
        .map_err(exhausted)?;

        tracing::info!(queue = %queue, chat_id = message.chat_id, "Message published");
        Ok(())
    }
}

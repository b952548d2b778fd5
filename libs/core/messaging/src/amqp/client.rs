use crate::broker::{Broker, DeliveryStream, Envelope};
use crate::config::ReconnectPolicy;
use crate::error::BrokerError;
use crate::health::BrokerHealth;
use crate::retry::retry_with_backoff;
use async_trait::async_trait;
use core_config::broker::BrokerConfig;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
    QueueDeleteOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

const REPLY_SUCCESS: u16 = 200;

/// One live connection plus the channel every caller shares.
struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// Close the channel, then the connection, skipping whichever is already
    /// down. lapin keeps a dropped connection open, so every session that
    /// leaves the client goes through here.
    async fn close(&self, reason: &str) -> Result<(), BrokerError> {
        let channel_result = if self.channel.status().connected() {
            self.channel
                .close(REPLY_SUCCESS, reason)
                .await
                .map_err(BrokerError::close)
        } else {
            Ok(())
        };

        let connection_result = if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, reason)
                .await
                .map_err(BrokerError::close)
        } else {
            Ok(())
        };

        channel_result.and(connection_result)
    }
}

/// Process-wide owner of the broker connection and channel.
///
/// lapin's `Channel` is internally synchronized, so callers only take the
/// session lock long enough to clone it; no lock is held across an `.await`.
/// Concurrent users stay isolated through unique reply-queue names, consumer
/// tags and correlation ids.
pub struct BrokerClient {
    config: BrokerConfig,
    session: RwLock<Option<Arc<Session>>>,
    closed: AtomicBool,
    pub(super) connection_lost: Arc<Notify>,
    pub(super) health: BrokerHealth,
}

impl BrokerClient {
    /// Create an unconnected client. [`close`](Self::close) is safe on it.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: RwLock::new(None),
            closed: AtomicBool::new(false),
            connection_lost: Arc::new(Notify::new()),
            health: BrokerHealth::new(),
        }
    }

    /// Dial once; fails with [`BrokerError::Connection`] without retrying.
    pub async fn connect_once(config: BrokerConfig) -> Result<Self, BrokerError> {
        let client = Self::new(config);
        client.establish().await?;
        Ok(client)
    }

    /// Dial with the configured [`ReconnectPolicy`] before giving up.
    pub async fn connect(config: BrokerConfig) -> Result<Self, BrokerError> {
        let policy = ReconnectPolicy::from(&config);
        let client = Self::new(config);
        retry_with_backoff(|| client.establish(), &policy, "broker.connect").await?;
        Ok(client)
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn health(&self) -> BrokerHealth {
        self.health.clone()
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Open a connection and channel and install them as the live session.
    #[instrument(name = "broker.establish", skip(self), fields(url = %self.config.redacted_url()))]
    pub(super) async fn establish(&self) -> Result<(), BrokerError> {
        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(BrokerError::connection)?;

        let lost = self.connection_lost.clone();
        connection.on_error(move |error| {
            warn!(error = %error, "Broker connection error");
            lost.notify_one();
        });

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                return Err(BrokerError::channel(e));
            }
        };

        let session = Arc::new(Session {
            connection,
            channel,
        });

        let previous = {
            let mut slot = self
                .session
                .write()
                .map_err(|_| BrokerError::channel("session lock poisoned"))?;
            // `close` flags before taking the lock, so this sees any close
            // that could have missed the new session.
            if self.is_closed() {
                None
            } else {
                Some(slot.replace(session.clone()))
            }
        };

        let Some(previous) = previous else {
            debug!("Client closed while dialing, discarding new connection");
            if let Err(e) = session.close("client closed").await {
                debug!(error = %e, "Failed to close discarded connection");
            }
            return Err(BrokerError::NotConnected);
        };

        if let Some(previous) = previous {
            if let Err(e) = previous.close("replaced by reconnect").await {
                debug!(error = %e, "Failed to close replaced session");
            }
        }

        self.health.set_connected(true).await;
        info!("Connected to broker");
        Ok(())
    }

    #[cfg(test)]
    fn current_session(&self) -> Option<Arc<Session>> {
        self.session.read().unwrap().clone()
    }

    /// Clone the shared channel if the session is live.
    fn channel(&self) -> Result<Channel, BrokerError> {
        let guard = self
            .session
            .read()
            .map_err(|_| BrokerError::channel("session lock poisoned"))?;
        match guard.as_ref() {
            Some(session) if session.is_connected() => Ok(session.channel.clone()),
            _ => Err(BrokerError::NotConnected),
        }
    }

    /// Declare a named queue. Redeclaring with the same settings is a no-op;
    /// different settings make the broker close the channel.
    pub async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        let channel = self.channel().map_err(BrokerError::queue_declare)?;
        channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::queue_declare)?;
        Ok(())
    }

    /// Close the channel, then the connection.
    ///
    /// Idempotent, and a no-op on a client that never connected. Stops the
    /// supervisor from re-dialing.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        self.connection_lost.notify_one();

        let session = self
            .session
            .write()
            .map_err(|_| BrokerError::close("session lock poisoned"))?
            .take();

        let Some(session) = session else {
            debug!("Broker close requested with no live session");
            return Ok(());
        };

        self.health.set_connected(false).await;
        let result = session.close("closing").await;
        info!("Broker connection closed");
        result
    }
}

#[async_trait]
impl Broker for BrokerClient {
    async fn declare_reply_queue(&self) -> Result<String, BrokerError> {
        let channel = self.channel().map_err(BrokerError::queue_declare)?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::queue_declare)?;

        Ok(queue.name().as_str().to_string())
    }

    async fn publish(&self, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let channel = self.channel().map_err(BrokerError::publish)?;

        let mut properties = BasicProperties::default();
        if let Some(content_type) = envelope.content_type {
            properties = properties.with_content_type(ShortString::from(content_type));
        }
        if let Some(correlation_id) = envelope.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id));
        }
        if let Some(reply_to) = envelope.reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to));
        }

        channel
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions::default(),
                &envelope.body,
                properties,
            )
            .await
            .map_err(BrokerError::publish)?
            .await
            .map_err(BrokerError::publish)?;

        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let channel = self.channel().map_err(BrokerError::consume)?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(BrokerError::consume)?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(envelope_from_delivery)
                    .map_err(BrokerError::consume)
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let channel = self.channel().map_err(BrokerError::cancel)?;
        channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(BrokerError::cancel)
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let channel = self.channel().map_err(BrokerError::delete)?;
        channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await
            .map_err(BrokerError::delete)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.channel().is_ok()
    }
}

fn envelope_from_delivery(delivery: Delivery) -> Envelope {
    let properties = &delivery.properties;
    let content_type = properties
        .content_type()
        .as_ref()
        .map(|s| s.as_str().to_owned());
    let correlation_id = properties
        .correlation_id()
        .as_ref()
        .map(|s| s.as_str().to_owned());
    let reply_to = properties.reply_to().as_ref().map(|s| s.as_str().to_owned());

    Envelope {
        body: delivery.data,
        content_type,
        correlation_id,
        reply_to,
    }
}

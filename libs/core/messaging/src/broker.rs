//! Transport seam between the request/reply protocol and a concrete broker.
//!
//! The RPC client and the background consumer only ever talk to a [`Broker`].
//! [`AmqpBroker`](crate::amqp::AmqpBroker) implements it over a shared lapin
//! channel; `MemoryBroker` (feature `testing`) implements it in-process.

use crate::error::BrokerError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// A message as published or delivered.
///
/// `correlation_id` and `reply_to` travel as broker metadata (AMQP basic
/// properties), never inside `body`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl Envelope {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Body as text, lossy for non-UTF-8 payloads.
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Stream of deliveries for one consumer registration.
///
/// Ends when the consumer is cancelled or the channel goes away.
pub type DeliveryStream = BoxStream<'static, Result<Envelope, BrokerError>>;

/// Publish/subscribe primitives the bridge is built on.
///
/// Implementations must be safe to call concurrently from many tasks:
/// isolation between callers comes from unique queue names and consumer
/// tags, not from callers locking the broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declare a fresh server-named, non-durable, exclusive, auto-delete queue
    /// and return its name.
    async fn declare_reply_queue(&self) -> Result<String, BrokerError>;

    /// Publish to the default exchange with `routing_key` as the queue name.
    async fn publish(&self, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError>;

    /// Start an auto-ack consumer on `queue` identified by `consumer_tag`.
    async fn consume(&self, queue: &str, consumer_tag: &str)
    -> Result<DeliveryStream, BrokerError>;

    /// Stop the consumer registered under `consumer_tag`.
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Delete `queue` (used to reclaim reply queues eagerly).
    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Whether a live connection and channel are currently held.
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for std::sync::Arc<B> {
    async fn declare_reply_queue(&self) -> Result<String, BrokerError> {
        (**self).declare_reply_queue().await
    }

    async fn publish(&self, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError> {
        (**self).publish(routing_key, envelope).await
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        (**self).consume(queue, consumer_tag).await
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        (**self).cancel(consumer_tag).await
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        (**self).delete_queue(queue).await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

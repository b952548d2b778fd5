//! In-process [`Broker`] for tests.
//!
//! Follows AMQP default-exchange semantics closely enough to exercise the
//! RPC protocol: publishes route by queue name, unroutable messages are
//! dropped, queues buffer until a consumer attaches, consumers on one queue
//! are served round-robin, and reply queues vanish when their last consumer
//! is cancelled. Counters expose what is still allocated so tests can assert
//! nothing leaks.

use crate::broker::{Broker, DeliveryStream, Envelope};
use crate::error::BrokerError;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Operation to fail once via [`MemoryBroker::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Declare,
    Publish,
    Consume,
    Cancel,
    Delete,
}

type Sender = mpsc::UnboundedSender<Result<Envelope, BrokerError>>;

#[derive(Default)]
struct Queue {
    auto_delete: bool,
    buffer: VecDeque<Envelope>,
    consumers: Vec<(String, Sender)>,
    next_consumer: usize,
}

impl Queue {
    /// Hand `envelope` to a live consumer, or buffer it.
    fn deliver(&mut self, envelope: Envelope) {
        while !self.consumers.is_empty() {
            let index = self.next_consumer % self.consumers.len();
            let (_, sender) = &self.consumers[index];
            if sender.unbounded_send(Ok(envelope.clone())).is_ok() {
                self.next_consumer = index + 1;
                return;
            }
            self.consumers.remove(index);
        }
        self.buffer.push_back(envelope);
    }
}

#[derive(Default)]
struct State {
    queues: HashMap<String, Queue>,
    consumer_queues: HashMap<String, String>,
    published: Vec<(String, Envelope)>,
    failures: HashSet<FailPoint>,
}

/// Broker double that keeps every queue in memory.
pub struct MemoryBroker {
    state: Mutex<State>,
    connected: AtomicBool,
    queue_prefix: String,
    next_queue: AtomicU64,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_queue_prefix("amq.gen-")
    }

    /// Reply queues are named `{prefix}1`, `{prefix}2`, ...
    pub fn with_queue_prefix(prefix: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            connected: AtomicBool::new(true),
            queue_prefix: prefix.into(),
            next_queue: AtomicU64::new(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare a named, durable queue (e.g. the validator's request queue).
    pub fn declare_queue(&self, name: &str) {
        self.state().queues.entry(name.to_string()).or_default();
    }

    /// Make the next call of `point` fail.
    pub fn fail_next(&self, point: FailPoint) {
        self.state().failures.insert(point);
    }

    /// Drop the connection: every delivery stream ends and reply queues go away.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let mut state = self.state();
        state.consumer_queues.clear();
        state.queues.retain(|_, queue| !queue.auto_delete);
        for queue in state.queues.values_mut() {
            queue.consumers.clear();
        }
    }

    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Server-named reply queues still allocated.
    pub fn reply_queue_count(&self) -> usize {
        self.state()
            .queues
            .values()
            .filter(|queue| queue.auto_delete)
            .count()
    }

    /// Registered consumers across all queues.
    pub fn consumer_count(&self) -> usize {
        self.state().consumer_queues.len()
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.state().queues.contains_key(name)
    }

    /// Messages buffered on `queue` with no consumer to take them.
    pub fn pending(&self, queue: &str) -> usize {
        self.state()
            .queues
            .get(queue)
            .map(|queue| queue.buffer.len())
            .unwrap_or(0)
    }

    /// Every envelope published with `routing_key`, in order.
    pub fn published(&self, routing_key: &str) -> Vec<Envelope> {
        self.state()
            .published
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    fn check(
        &self,
        state: &mut State,
        point: FailPoint,
        wrap: fn(&str) -> BrokerError,
    ) -> Result<(), BrokerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(wrap("broker is not connected"));
        }
        if state.failures.remove(&point) {
            return Err(wrap("injected failure"));
        }
        Ok(())
    }

    fn remove_consumer(state: &mut State, consumer_tag: &str) {
        let Some(queue_name) = state.consumer_queues.remove(consumer_tag) else {
            return;
        };
        let Some(queue) = state.queues.get_mut(&queue_name) else {
            return;
        };
        queue.consumers.retain(|(tag, _)| tag != consumer_tag);
        if queue.auto_delete && queue.consumers.is_empty() {
            state.queues.remove(&queue_name);
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_reply_queue(&self) -> Result<String, BrokerError> {
        let mut state = self.state();
        self.check(&mut state, FailPoint::Declare, |e| BrokerError::queue_declare(e))?;

        let id = self.next_queue.fetch_add(1, Ordering::SeqCst);
        let name = format!("{}{}", self.queue_prefix, id);
        state.queues.insert(
            name.clone(),
            Queue {
                auto_delete: true,
                ..Default::default()
            },
        );
        Ok(name)
    }

    async fn publish(&self, routing_key: &str, envelope: Envelope) -> Result<(), BrokerError> {
        let mut state = self.state();
        self.check(&mut state, FailPoint::Publish, |e| BrokerError::publish(e))?;

        state
            .published
            .push((routing_key.to_string(), envelope.clone()));
        if let Some(queue) = state.queues.get_mut(routing_key) {
            queue.deliver(envelope);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, BrokerError> {
        let mut state = self.state();
        self.check(&mut state, FailPoint::Consume, |e| BrokerError::consume(e))?;

        if state.consumer_queues.contains_key(consumer_tag) {
            return Err(BrokerError::consume(format!(
                "consumer tag {consumer_tag} already in use"
            )));
        }
        let Some(target) = state.queues.get_mut(queue) else {
            return Err(BrokerError::consume(format!("no queue '{queue}'")));
        };

        let (sender, receiver) = mpsc::unbounded();
        target.consumers.push((consumer_tag.to_string(), sender));
        for envelope in std::mem::take(&mut target.buffer) {
            target.deliver(envelope);
        }
        state
            .consumer_queues
            .insert(consumer_tag.to_string(), queue.to_string());

        Ok(receiver.boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        self.check(&mut state, FailPoint::Cancel, |e| BrokerError::cancel(e))?;
        Self::remove_consumer(&mut state, consumer_tag);
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        self.check(&mut state, FailPoint::Delete, |e| BrokerError::delete(e))?;

        if let Some(removed) = state.queues.remove(queue) {
            for (tag, _) in removed.consumers {
                state.consumer_queues.remove(&tag);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_queue_names_use_prefix() {
        let broker = MemoryBroker::with_queue_prefix("rq-");
        assert_eq!(broker.declare_reply_queue().await.unwrap(), "rq-1");
        assert_eq!(broker.declare_reply_queue().await.unwrap(), "rq-2");
        assert_eq!(broker.reply_queue_count(), 2);
    }

    #[tokio::test]
    async fn test_unroutable_publish_is_dropped() {
        let broker = MemoryBroker::new();
        broker.publish("nowhere", Envelope::new("x")).await.unwrap();
        assert!(!broker.queue_exists("nowhere"));
        assert_eq!(broker.published("nowhere").len(), 1);
    }

    #[tokio::test]
    async fn test_buffered_messages_flush_to_new_consumer() {
        let broker = MemoryBroker::new();
        broker.declare_queue("auth_queue");
        broker
            .publish("auth_queue", Envelope::new("first"))
            .await
            .unwrap();
        assert_eq!(broker.pending("auth_queue"), 1);

        let mut stream = broker.consume("auth_queue", "validator").await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.body_str(), "first");
        assert_eq!(broker.pending("auth_queue"), 0);
    }

    #[tokio::test]
    async fn test_cancel_last_consumer_deletes_reply_queue() {
        let broker = MemoryBroker::new();
        let queue = broker.declare_reply_queue().await.unwrap();
        let mut stream = broker.consume(&queue, "tag-1").await.unwrap();
        assert_eq!(broker.consumer_count(), 1);

        broker.cancel("tag-1").await.unwrap();
        assert_eq!(broker.consumer_count(), 0);
        assert_eq!(broker.reply_queue_count(), 0);
        assert!(stream.next().await.is_none());

        // Deleting an already gone queue is not an error.
        broker.delete_queue(&queue).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let broker = MemoryBroker::new();
        broker.fail_next(FailPoint::Declare);

        let err = broker.declare_reply_queue().await.unwrap_err();
        assert!(matches!(err, BrokerError::QueueDeclare(_)));
        assert!(broker.declare_reply_queue().await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_failure_names_the_delete_step() {
        let broker = MemoryBroker::new();
        let queue = broker.declare_reply_queue().await.unwrap();
        broker.fail_next(FailPoint::Delete);

        let err = broker.delete_queue(&queue).await.unwrap_err();
        assert!(matches!(err, BrokerError::Delete(_)));
        assert!(err.to_string().starts_with("queue delete error"));
    }

    #[tokio::test]
    async fn test_disconnect_ends_streams() {
        let broker = MemoryBroker::new();
        broker.declare_queue("token_created_queue");
        let mut stream = broker.consume("token_created_queue", "c1").await.unwrap();

        broker.disconnect();
        assert!(!broker.is_connected());
        assert!(stream.next().await.is_none());
        assert!(broker.queue_exists("token_created_queue"));

        let err = broker.publish("x", Envelope::new("y")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Publish(_)));
    }
}

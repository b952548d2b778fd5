//! Long-lived consumer for application event queues.
//!
//! Shares the broker connection with the RPC client but none of its
//! reply-queue or correlation machinery: it subscribes to one named queue
//! and hands every delivery to an [`EventHandler`].

use crate::broker::{Broker, DeliveryStream, Envelope};
use crate::config::ConsumerConfig;
use crate::error::{BrokerError, ProcessingError};
use crate::health::BrokerHealth;
use crate::metrics::ConsumerMetrics;
use crate::retry::backoff_delay;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Reacts to one delivered event.
///
/// Deliveries are auto-acked, so a returned error is logged and counted but
/// the message is not redelivered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Envelope) -> Result<(), ProcessingError>;

    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;
}

enum DrainOutcome {
    Shutdown,
    Lost(BrokerError),
}

/// Drains a queue until shutdown or until re-subscribing is exhausted.
pub struct EventConsumer<B: Broker, H: EventHandler> {
    broker: Arc<B>,
    handler: Arc<H>,
    config: ConsumerConfig,
    health: Option<BrokerHealth>,
    metrics: ConsumerMetrics,
}

impl<B: Broker, H: EventHandler> EventConsumer<B, H> {
    pub fn new(broker: Arc<B>, handler: H, config: ConsumerConfig) -> Self {
        let metrics = ConsumerMetrics::new(&config.queue_name, handler.name());
        Self {
            broker,
            handler: Arc::new(handler),
            config,
            health: None,
            metrics,
        }
    }

    /// Report running/failed state into `health`.
    pub fn with_health(mut self, health: BrokerHealth) -> Self {
        self.health = Some(health);
        self
    }

    /// Consume until `shutdown` flips to `true`.
    ///
    /// A failed subscription or an ended delivery stream is retried with the
    /// configured policy. Once retries are exhausted the last broker error is
    /// returned and health is marked degraded; the caller keeps running.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        let queue = self.config.queue_name.as_str();
        let policy = &self.config.resubscribe;
        let mut attempt: u32 = 0;

        info!(
            queue = %queue,
            handler = self.handler.name(),
            "Starting event consumer"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let consumer_tag = self.config.next_consumer_tag();
            let lost = match self.broker.consume(queue, &consumer_tag).await {
                Ok(stream) => {
                    attempt = 0;
                    self.set_running(true).await;
                    debug!(queue = %queue, consumer_tag = %consumer_tag, "Subscribed");

                    match self.drain(stream, &mut shutdown).await {
                        DrainOutcome::Shutdown => {
                            if let Err(e) = self.broker.cancel(&consumer_tag).await {
                                debug!(error = %e, consumer_tag = %consumer_tag, "Cancel on shutdown failed");
                            }
                            break;
                        }
                        DrainOutcome::Lost(e) => e,
                    }
                }
                Err(e) => e,
            };

            self.set_running(false).await;

            if attempt >= policy.max_retries {
                error!(
                    queue = %queue,
                    error = %lost,
                    attempts = attempt + 1,
                    "Event consumer giving up"
                );
                if let Some(health) = &self.health {
                    health.set_consumer_failed(lost.to_string()).await;
                }
                return Err(lost);
            }

            let delay = backoff_delay(policy, attempt);
            warn!(
                queue = %queue,
                error = %lost,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Event subscription lost, re-subscribing"
            );
            self.metrics.resubscribed();
            attempt += 1;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.set_running(false).await;
        info!(queue = %queue, "Event consumer stopped");
        Ok(())
    }

    async fn drain(
        &self,
        mut stream: DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> DrainOutcome {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping event consumer");
                        return DrainOutcome::Shutdown;
                    }
                }
                delivery = stream.next() => match delivery {
                    Some(Ok(event)) => self.process(&event).await,
                    Some(Err(e)) => return DrainOutcome::Lost(e),
                    None => {
                        return DrainOutcome::Lost(BrokerError::consume("delivery stream ended"));
                    }
                },
            }
        }
    }

    async fn process(&self, event: &Envelope) {
        self.metrics.event_received();
        let start = Instant::now();

        match self.handler.handle(event).await {
            Ok(()) => {
                let duration = start.elapsed();
                self.metrics.event_processed(duration);
                debug!(
                    handler = self.handler.name(),
                    duration_ms = duration.as_millis() as u64,
                    "Event processed"
                );
            }
            Err(e) => {
                let category = e.category();
                self.metrics.event_failed(&category.to_string());
                warn!(
                    handler = self.handler.name(),
                    error = %e,
                    category = %category,
                    "Event handler failed, message dropped"
                );
            }
        }
    }

    async fn set_running(&self, running: bool) {
        if let Some(health) = &self.health {
            health.set_consumer_running(running).await;
        }
    }
}

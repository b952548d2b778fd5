//! Token validation as request/reply over the broker.
//!
//! Every call owns a fresh exclusive reply queue and a UUID correlation id.
//! The reply consumer is registered before the request is published so a
//! fast validator cannot beat the subscription. Replies whose correlation id
//! does not match are dropped and the wait goes on until the deadline.

mod call;
mod guard;

pub use call::{CallState, PendingCall};

use crate::broker::{Broker, Envelope};
use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::metrics::RpcMetrics;
use futures::StreamExt;
use guard::ReplyQueueGuard;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Span};

/// Body the validator sends for an accepted token. Anything else is a rejection.
const VALID_REPLY: &[u8] = b"true";

type CorrelationIdFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Client for the external token validator.
///
/// Cheap to clone; clones share the broker connection.
pub struct RpcClient<B: Broker> {
    broker: Arc<B>,
    config: RpcConfig,
    metrics: RpcMetrics,
    correlation_ids: CorrelationIdFn,
}

impl<B: Broker> Clone for RpcClient<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            correlation_ids: self.correlation_ids.clone(),
        }
    }
}

impl<B: Broker> RpcClient<B> {
    pub fn new(broker: Arc<B>, config: RpcConfig) -> Self {
        let metrics = RpcMetrics::new(&config.request_queue);
        Self {
            broker,
            config,
            metrics,
            correlation_ids: Arc::new(|| uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Replace the UUID generator, e.g. to pin ids in tests.
    pub fn with_correlation_ids(
        mut self,
        generator: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.correlation_ids = Arc::new(generator);
        self
    }

    /// Ask the validator whether `token` is valid.
    ///
    /// `Ok(false)` means the validator rejected the token. Broker failures
    /// and timeouts are errors so callers can tell them apart.
    pub async fn validate(&self, token: &str) -> Result<bool, RpcError> {
        self.validate_with_cancel(token, CancellationToken::new())
            .await
    }

    /// [`validate`](Self::validate), resolving as [`RpcError::Cancelled`]
    /// as soon as `cancel` fires.
    #[instrument(
        name = "rpc.validate",
        skip_all,
        fields(
            queue = %self.config.request_queue,
            correlation_id = tracing::field::Empty,
            reply_queue = tracing::field::Empty,
        )
    )]
    pub async fn validate_with_cancel(
        &self,
        token: &str,
        cancel: CancellationToken,
    ) -> Result<bool, RpcError> {
        let started = Instant::now();
        let mut call = PendingCall::new((self.correlation_ids)(), self.config.timeout);
        Span::current().record("correlation_id", call.correlation_id());

        let in_flight = self.metrics.track_in_flight();
        let result = self.run(token, &mut call, &cancel).await;
        drop(in_flight);

        if !call.state().is_terminal() {
            call.advance(if result.is_err() {
                CallState::Failed
            } else {
                CallState::Invalid
            });
        }

        match &result {
            Ok(valid) => {
                let outcome = if *valid { "valid" } else { "invalid" };
                self.metrics.call_completed(outcome, started.elapsed());
                debug!(
                    outcome,
                    state = %call.state(),
                    discarded = call.discarded(),
                    "Validation call resolved"
                );
            }
            Err(e) => {
                self.metrics.call_failed(e.kind());
                warn!(error = %e, state = %call.state(), "Validation call failed");
            }
        }

        result
    }

    async fn run(
        &self,
        token: &str,
        call: &mut PendingCall,
        cancel: &CancellationToken,
    ) -> Result<bool, RpcError> {
        if cancel.is_cancelled() {
            call.advance(CallState::Cancelled);
            return Err(RpcError::Cancelled);
        }

        let reply_queue = self.broker.declare_reply_queue().await?;
        Span::current().record("reply_queue", reply_queue.as_str());
        call.queue_declared(reply_queue.clone());

        let mut guard =
            ReplyQueueGuard::new(self.broker.clone(), reply_queue.clone(), self.metrics.clone());
        let result = self.exchange(token, call, cancel, &reply_queue, &mut guard).await;
        guard.release().await;
        result
    }

    async fn exchange(
        &self,
        token: &str,
        call: &mut PendingCall,
        cancel: &CancellationToken,
        reply_queue: &str,
        guard: &mut ReplyQueueGuard<B>,
    ) -> Result<bool, RpcError> {
        let consumer_tag = format!("rpc-{}", call.correlation_id());
        let mut replies = self.broker.consume(reply_queue, &consumer_tag).await?;
        guard.set_consumer(consumer_tag);

        let request = Envelope::new(token)
            .with_content_type(self.config.content_type.clone())
            .with_correlation_id(call.correlation_id())
            .with_reply_to(reply_queue);
        self.broker
            .publish(&self.config.request_queue, request)
            .await?;
        call.advance(CallState::Published);
        call.advance(CallState::Waiting);

        let deadline = tokio::time::sleep_until(call.deadline());
        tokio::pin!(deadline);

        let mut stream_open = true;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    call.advance(CallState::Cancelled);
                    info!("Validation call cancelled by caller");
                    return Err(RpcError::Cancelled);
                }
                _ = &mut deadline => {
                    call.advance(CallState::TimedOut);
                    return Err(RpcError::Timeout(self.config.timeout));
                }
                delivery = replies.next(), if stream_open => match delivery {
                    Some(Ok(reply)) if call.matches(&reply) => {
                        let valid = reply.body == VALID_REPLY;
                        call.advance(if valid { CallState::Valid } else { CallState::Invalid });
                        return Ok(valid);
                    }
                    Some(Ok(reply)) => {
                        call.record_discarded();
                        self.metrics.reply_discarded();
                        debug!(
                            received = reply.correlation_id.as_deref().unwrap_or("<none>"),
                            "Discarding reply with mismatched correlation id"
                        );
                    }
                    Some(Err(e)) => {
                        call.advance(CallState::Failed);
                        return Err(e.into());
                    }
                    // Channel lost; nothing else can arrive before the deadline.
                    None => stream_open = false,
                },
            }
        }
    }
}

use crate::broker::Broker;
use crate::metrics::RpcMetrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns a reply queue and its consumer for the duration of one call.
///
/// [`release`](Self::release) cancels the consumer and deletes the queue.
/// If the guard is dropped unreleased (the call future was abandoned) the
/// same cleanup is spawned on the current runtime.
pub(crate) struct ReplyQueueGuard<B: Broker> {
    broker: Arc<B>,
    queue: String,
    consumer_tag: Option<String>,
    metrics: RpcMetrics,
    released: bool,
}

impl<B: Broker> ReplyQueueGuard<B> {
    pub(crate) fn new(broker: Arc<B>, queue: String, metrics: RpcMetrics) -> Self {
        Self {
            broker,
            queue,
            consumer_tag: None,
            metrics,
            released: false,
        }
    }

    pub(crate) fn set_consumer(&mut self, consumer_tag: String) {
        self.consumer_tag = Some(consumer_tag);
    }

    pub(crate) async fn release(mut self) {
        self.released = true;
        cleanup(
            self.broker.clone(),
            self.queue.clone(),
            self.consumer_tag.take(),
            self.metrics.clone(),
        )
        .await;
    }
}

impl<B: Broker> Drop for ReplyQueueGuard<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let broker = self.broker.clone();
        let queue = std::mem::take(&mut self.queue);
        let consumer_tag = self.consumer_tag.take();
        let metrics = self.metrics.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup(broker, queue, consumer_tag, metrics));
            }
            Err(_) => {
                warn!(reply_queue = %queue, "No runtime to release reply queue, relying on auto-delete");
                metrics.cleanup_failed();
            }
        }
    }
}

async fn cleanup<B: Broker>(
    broker: Arc<B>,
    queue: String,
    consumer_tag: Option<String>,
    metrics: RpcMetrics,
) {
    if let Some(tag) = consumer_tag {
        if let Err(e) = broker.cancel(&tag).await {
            warn!(error = %e, consumer_tag = %tag, "Failed to cancel reply consumer");
            metrics.cleanup_failed();
        }
    }

    // Reply queues auto-delete with their last consumer; the explicit delete
    // covers the declared-but-never-consumed case.
    match broker.delete_queue(&queue).await {
        Ok(()) => debug!(reply_queue = %queue, "Reply queue released"),
        Err(e) => {
            warn!(error = %e, reply_queue = %queue, "Failed to delete reply queue");
            metrics.cleanup_failed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;

    #[tokio::test]
    async fn test_release_cancels_consumer_and_deletes_queue() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = broker.declare_reply_queue().await.unwrap();
        let _stream = broker.consume(&queue, "tag-1").await.unwrap();

        let mut guard = ReplyQueueGuard::new(broker.clone(), queue, RpcMetrics::new("auth_queue"));
        guard.set_consumer("tag-1".to_string());
        guard.release().await;

        assert_eq!(broker.consumer_count(), 0);
        assert_eq!(broker.reply_queue_count(), 0);
    }

    #[tokio::test]
    async fn test_release_without_consumer_deletes_queue() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = broker.declare_reply_queue().await.unwrap();

        ReplyQueueGuard::new(broker.clone(), queue, RpcMetrics::new("auth_queue"))
            .release()
            .await;

        assert_eq!(broker.reply_queue_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_spawns_cleanup() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = broker.declare_reply_queue().await.unwrap();
        let _stream = broker.consume(&queue, "tag-1").await.unwrap();

        {
            let mut guard =
                ReplyQueueGuard::new(broker.clone(), queue, RpcMetrics::new("auth_queue"));
            guard.set_consumer("tag-1".to_string());
        }

        for _ in 0..10 {
            if broker.reply_queue_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(broker.consumer_count(), 0);
        assert_eq!(broker.reply_queue_count(), 0);
    }
}

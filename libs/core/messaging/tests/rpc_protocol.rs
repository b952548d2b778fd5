//! Request/reply protocol tests against the in-memory broker with a stub
//! validator service on `auth_queue`.

use futures::future::join_all;
use futures::StreamExt;
use messaging::{Broker, BrokerError, CancellationToken, Envelope, MemoryBroker, RpcClient, RpcConfig, RpcError};
use std::sync::Arc;
use std::time::Duration;
use test_utils::assertions::assert_within;
use test_utils::TestDataBuilder;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const AUTH_QUEUE: &str = "auth_queue";

/// A reply the stub validator sends after `delay`.
struct Reply {
    to: String,
    envelope: Envelope,
    delay: Duration,
}

impl Reply {
    /// Answer `request` on its reply queue with its own correlation id.
    fn answer(request: &Envelope, body: &str) -> Self {
        let mut envelope = Envelope::new(body);
        envelope.correlation_id = request.correlation_id.clone();
        Self {
            to: request.reply_to.clone().unwrap_or_default(),
            envelope,
            delay: Duration::ZERO,
        }
    }

    fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn broker() -> Arc<MemoryBroker> {
    let broker = Arc::new(MemoryBroker::with_queue_prefix("rq-"));
    broker.declare_queue(AUTH_QUEUE);
    broker
}

fn client(broker: &Arc<MemoryBroker>, timeout: Duration) -> RpcClient<MemoryBroker> {
    RpcClient::new(broker.clone(), RpcConfig::new(AUTH_QUEUE).with_timeout(timeout))
}

/// Stub validator: every request on `auth_queue` is answered by `respond`.
fn spawn_validator<F>(broker: &Arc<MemoryBroker>, respond: F) -> JoinHandle<()>
where
    F: Fn(&Envelope) -> Vec<Reply> + Send + 'static,
{
    let broker = broker.clone();
    tokio::spawn(async move {
        let mut requests = broker
            .consume(AUTH_QUEUE, "validator")
            .await
            .expect("validator subscribes");

        while let Some(Ok(request)) = requests.next().await {
            for reply in respond(&request) {
                let broker = broker.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(reply.delay).await;
                    let _ = broker.publish(&reply.to, reply.envelope).await;
                });
            }
        }
    })
}

async fn settle(broker: &MemoryBroker, expected_consumers: usize) {
    for _ in 0..100 {
        if broker.reply_queue_count() == 0 && broker.consumer_count() == expected_consumers {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_end_to_end_accepts_token() {
    let broker = broker();
    spawn_validator(&broker, |request| {
        vec![Reply::answer(request, "true").after(Duration::from_millis(50))]
    });

    let started = Instant::now();
    let valid = client(&broker, Duration::from_secs(10))
        .with_correlation_ids(|| "abc-123".to_string())
        .validate("header.payload.signature")
        .await
        .unwrap();

    assert!(valid);
    assert!(started.elapsed() < Duration::from_millis(200));

    let requests = broker.published(AUTH_QUEUE);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].correlation_id.as_deref(), Some("abc-123"));
    assert_eq!(requests[0].reply_to.as_deref(), Some("rq-1"));
    assert_eq!(requests[0].body_str(), "header.payload.signature");

    let replies = broker.published("rq-1");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].correlation_id.as_deref(), Some("abc-123"));
}

#[tokio::test]
async fn test_only_exact_true_body_is_valid() {
    let broker = broker();
    // The token itself is echoed back as the reply body.
    spawn_validator(&broker, |request| {
        vec![Reply::answer(request, &request.body_str())]
    });
    let client = client(&broker, Duration::from_secs(5));

    assert!(client.validate("true").await.unwrap());
    for body in ["false", "", "TRUE", "true ", "1", "yes"] {
        assert!(!client.validate(body).await.unwrap(), "body {body:?}");
    }
}

#[tokio::test]
async fn test_mismatched_reply_never_resolves_the_call() {
    let broker = broker();
    spawn_validator(&broker, |request| {
        let mut stray = Reply::answer(request, "true");
        stray.envelope.correlation_id = Some("someone-else".to_string());
        let mut missing = Reply::answer(request, "true");
        missing.envelope.correlation_id = None;
        vec![stray, missing]
    });

    let timeout = Duration::from_millis(200);
    let started = Instant::now();
    let err = client(&broker, timeout).validate("token").await.unwrap_err();

    assert!(matches!(err, RpcError::Timeout(_)));
    assert!(started.elapsed() >= timeout);
    settle(&broker, 1).await;
    assert_eq!(broker.reply_queue_count(), 0);
}

#[tokio::test]
async fn test_cross_talk_is_ignored_between_concurrent_calls() {
    let broker = broker();

    // Hold both requests, then deliver C2's answer onto C1's queue before the
    // real answers, simulating a routing bug.
    let validator = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let mut requests = broker.consume(AUTH_QUEUE, "validator").await.unwrap();
            let mut pending = Vec::new();
            while pending.len() < 2 {
                pending.push(requests.next().await.unwrap().unwrap());
            }
            let (c1, c2) = if pending[0].body_str() == "good" {
                (&pending[0], &pending[1])
            } else {
                (&pending[1], &pending[0])
            };

            let mut misrouted = Envelope::new("false");
            misrouted.correlation_id = c2.correlation_id.clone();
            let c1_queue = c1.reply_to.clone().unwrap();
            broker.publish(&c1_queue, misrouted).await.unwrap();

            tokio::time::sleep(Duration::from_millis(20)).await;
            let reply = Reply::answer(c1, "true");
            broker.publish(&reply.to, reply.envelope).await.unwrap();
            let reply = Reply::answer(c2, "false");
            broker.publish(&reply.to, reply.envelope).await.unwrap();
        })
    };

    let client = client(&broker, Duration::from_secs(5));
    let (c1, c2) = tokio::join!(client.validate("good"), client.validate("bad"));

    assert!(c1.unwrap());
    assert!(!c2.unwrap());
    validator.await.unwrap();
}

#[tokio::test]
async fn test_timeout_resolves_within_window() {
    let broker = broker();
    let timeout = Duration::from_millis(200);

    let started = std::time::Instant::now();
    let err = client(&broker, timeout).validate("token").await.unwrap_err();

    assert!(matches!(err, RpcError::Timeout(d) if d == timeout));
    assert!(err.is_retryable());
    assert_within(started.elapsed(), timeout, Duration::from_millis(150), "timeout");
    assert_eq!(broker.reply_queue_count(), 0);
    assert_eq!(broker.consumer_count(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() {
    let broker = broker();
    spawn_validator(&broker, |request| {
        let token = request.body_str();
        let n: u64 = token.trim_start_matches("tok-").parse().unwrap_or(0);
        let body = if n % 2 == 0 { "true" } else { "false" };
        // Later calls answer sooner to interleave completions.
        vec![Reply::answer(request, body).after(Duration::from_millis(40 - n % 40))]
    });

    let client = client(&broker, Duration::from_secs(5));
    let calls = (0..64u64).map(|n| {
        let client = client.clone();
        async move { (n, client.validate(&format!("tok-{n}")).await) }
    });

    for (n, result) in join_all(calls).await {
        assert_eq!(result.unwrap(), n % 2 == 0, "call {n}");
    }

    settle(&broker, 1).await;
    assert_eq!(broker.reply_queue_count(), 0);
    assert_eq!(broker.consumer_count(), 1);
}

#[tokio::test]
async fn test_sequential_calls_do_not_leak_queues() {
    let broker = broker();
    spawn_validator(&broker, |request| vec![Reply::answer(request, "true")]);
    let builder = TestDataBuilder::from_test_name("test_sequential_calls_do_not_leak_queues");
    let client = client(&broker, Duration::from_secs(5));

    for n in 0..1_000 {
        assert!(client.validate(&builder.token(&n.to_string())).await.unwrap());
    }

    assert_eq!(broker.reply_queue_count(), 0);
    assert_eq!(broker.consumer_count(), 1);
    assert_eq!(broker.published(AUTH_QUEUE).len(), 1_000);
}

#[tokio::test]
async fn test_failed_calls_do_not_leak_queues() {
    let broker = broker();
    // Only mismatched traffic: every call times out.
    spawn_validator(&broker, |request| {
        let mut stray = Reply::answer(request, "true");
        stray.envelope.correlation_id = Some("stray".to_string());
        vec![stray]
    });
    let client = client(&broker, Duration::from_millis(10));

    for _ in 0..25 {
        let err = client.validate("token").await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
    }

    settle(&broker, 1).await;
    assert_eq!(broker.reply_queue_count(), 0);
    assert_eq!(broker.consumer_count(), 1);
}

#[tokio::test]
async fn test_cancellation_resolves_immediately_and_releases_queue() {
    let broker = broker();
    let client = client(&broker, Duration::from_secs(10));
    let cancel = CancellationToken::new();

    let call = tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move { client.validate_with_cancel("token", cancel).await }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(broker.reply_queue_count(), 1);

    let started = Instant::now();
    cancel.cancel();
    let err = call.await.unwrap().unwrap_err();

    assert!(matches!(err, RpcError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(broker.reply_queue_count(), 0);
    assert_eq!(broker.consumer_count(), 0);
}

#[tokio::test]
async fn test_abandoned_call_releases_queue() {
    let broker = broker();
    let client = client(&broker, Duration::from_secs(10));

    let abandoned = tokio::time::timeout(Duration::from_millis(30), client.validate("token")).await;
    assert!(abandoned.is_err());

    settle(&broker, 0).await;
    assert_eq!(broker.reply_queue_count(), 0);
    assert_eq!(broker.consumer_count(), 0);
}

#[tokio::test]
async fn test_broker_failure_is_distinguishable_from_invalid_token() {
    let broker = broker();
    broker.disconnect();

    let err = client(&broker, Duration::from_secs(1))
        .validate("token")
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Broker(BrokerError::QueueDeclare(_))));
    assert!(err.is_retryable());
}

//! Same request/reply flow against a real RabbitMQ.
//!
//! Run with `cargo test -p messaging -- --ignored` (needs Docker).

use core_config::broker::BrokerConfig;
use futures::StreamExt;
use messaging::amqp::BrokerClient;
use messaging::{Broker, Envelope, RpcClient, RpcConfig, RpcError};
use std::sync::Arc;
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRabbitMq};

async fn connect(rabbit: &TestRabbitMq) -> Arc<BrokerClient> {
    let config = BrokerConfig::new(rabbit.connection_string());
    Arc::new(BrokerClient::connect(config).await.expect("broker reachable"))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_validate_round_trip_over_rabbitmq() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("test_validate_round_trip_over_rabbitmq");
    let queue = builder.name("queue", "auth");

    let validator = connect(&rabbit).await;
    validator.declare_queue(&queue, false).await.unwrap();
    let mut requests = validator.consume(&queue, "validator").await.unwrap();
    tokio::spawn({
        let validator = validator.clone();
        async move {
            while let Some(Ok(request)) = requests.next().await {
                let body = if request.body_str() == "good" { "true" } else { "false" };
                let mut reply = Envelope::new(body);
                reply.correlation_id = request.correlation_id.clone();
                let reply_to = request.reply_to.clone().unwrap_or_default();
                let _ = validator.publish(&reply_to, reply).await;
            }
        }
    });

    let broker = connect(&rabbit).await;
    let client = RpcClient::new(
        broker.clone(),
        RpcConfig::new(&queue).with_timeout(Duration::from_secs(5)),
    );

    assert!(client.validate("good").await.unwrap());
    assert!(!client.validate("bad").await.unwrap());

    broker.close().await.unwrap();
    validator.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_unanswered_call_times_out_over_rabbitmq() {
    let rabbit = TestRabbitMq::new().await;
    let broker = connect(&rabbit).await;
    broker.declare_queue("silent_queue", false).await.unwrap();

    let client = RpcClient::new(
        broker.clone(),
        RpcConfig::new("silent_queue").with_timeout(Duration::from_millis(300)),
    );

    let err = client.validate("token").await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout(_)));
    assert!(broker.is_connected());

    broker.close().await.unwrap();
    broker.close().await.unwrap();
}

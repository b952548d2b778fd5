//! Products API: HTTP service whose requests are authenticated by the auth
//! service over RabbitMQ RPC.

use axum_helpers::{
    create_production_app, create_router, health_router, metrics_router, AuthState, JwtVerifier,
    ShutdownCoordinator,
};
use core_config::tracing::{init_tracing, install_color_eyre};
use messaging::amqp::BrokerClient;
use messaging::metrics::init_metrics;
use messaging::{ConsumerConfig, EventConsumer, ReconnectPolicy, RpcClient, RpcConfig};
use std::sync::Arc;
use tracing::{error, info, warn};

mod api;
mod config;
mod events;

use config::Config;
use events::TokenCreatedHandler;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);
    let metrics = init_metrics()?;

    info!("Connecting to RabbitMQ at {}", config.broker.redacted_url());
    let broker = Arc::new(BrokerClient::connect(config.broker.clone()).await?);
    info!("Successfully connected to RabbitMQ");

    let (coordinator, _shutdown_rx) = ShutdownCoordinator::new();

    let supervisor = tokio::spawn({
        let broker = broker.clone();
        let shutdown = coordinator.subscribe();
        async move { broker.supervise(shutdown).await }
    });

    let consumer = {
        let handler = TokenCreatedHandler::new(JwtVerifier::new(&config.jwt));
        let consumer_config = ConsumerConfig::new(config.broker.token_created_queue.clone())
            .with_resubscribe_policy(ReconnectPolicy::from(&config.broker));
        let consumer = EventConsumer::new(broker.clone(), handler, consumer_config)
            .with_health(broker.health());
        let shutdown = coordinator.subscribe();
        tokio::spawn(async move {
            if let Err(e) = consumer.run(shutdown).await {
                error!(error = %e, "Token event consumer stopped; continuing without it");
            }
        })
    };

    let rpc = RpcClient::new(broker.clone(), RpcConfig::from(&config.broker));
    let auth = AuthState::new(Arc::new(rpc)).with_shutdown(coordinator.cancellation_token());

    let app = create_router(api::routes(auth))
        .merge(health_router(config.app, broker.health()))
        .merge(metrics_router(metrics));

    info!(
        "Starting {} v{} on port {}",
        config.app.name, config.app.version, config.server.port
    );

    let cleanup_broker = broker.clone();
    create_production_app(
        app,
        &config.server,
        coordinator,
        async move {
            if let Err(e) = consumer.await {
                warn!(error = %e, "Consumer task ended abnormally");
            }
            if let Err(e) = supervisor.await {
                warn!(error = %e, "Supervisor task ended abnormally");
            }
            info!("Shutting down: closing RabbitMQ connection");
            if let Err(e) = cleanup_broker.close().await {
                warn!(error = %e, "Failed to close RabbitMQ connection cleanly");
            }
            info!("RabbitMQ connection closed");
        },
    )
    .await
    .map_err(|e| eyre::eyre!("Server error: {}", e))?;

    info!("Products API shutdown complete");
    Ok(())
}

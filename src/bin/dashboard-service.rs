//! Coindeck Dashboard Service
//!
//! Consumes the job-outcome queues and pushes typed updates to connected
//! dashboard clients over websockets. Establishes all subscriptions at
//! startup, then blocks on the shutdown signal; on shutdown the
//! subscriptions are torn down before the process exits.

use backon::{ExponentialBuilder, Retryable};
use coindeck::config;
use coindeck::core::http::{self, AppState};
use coindeck::core::warmup::WarmupCoordinator;
use coindeck::handlers::{KlinesHandler, SpotCoinsHandler, WarmupHandler};
use coindeck::logging;
use coindeck::messaging::amqp::AmqpBroker;
use coindeck::messaging::broker::MessageBroker;
use coindeck::messaging::consumer::ConsumerManager;
use coindeck::messaging::envelope::JobEnvelope;
use coindeck::messaging::handler::MessageHandler;
use coindeck::messaging::topology::{queues, BrokerTopology};
use coindeck::metrics::Metrics;
use coindeck::push::{PushChannel, WsHub};
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env if present
    dotenv().ok();

    // Initialize logging based on environment
    logging::init_logging();

    let env = config::get_environment();
    info!("Starting Coindeck Dashboard Service");
    info!(environment = %env, "Environment");
    info!("This service consumes job outcomes and pushes them to dashboard clients");

    // Initialize metrics
    let metrics = Arc::new(Metrics::new()?);

    let hub = Arc::new(WsHub::new().with_metrics(metrics.clone()));
    let warmup = Arc::new(WarmupCoordinator::new());

    // Connect to the broker (with startup retry) and ensure the topology
    info!("Connecting to AMQP broker...");
    let amqp_url = config::get_amqp_url();
    let exchange = config::get_exchange_name();
    let broker = (|| async { AmqpBroker::connect(&amqp_url, &exchange).await })
        .retry(ExponentialBuilder::default().with_max_times(5))
        .notify(|err, dur| {
            warn!(error = %err, retry_in = ?dur, "AMQP connection failed, retrying");
        })
        .await?;
    let broker: Arc<dyn MessageBroker> = Arc::new(broker);
    metrics.broker_connected.set(1.0);
    info!("AMQP broker connected");

    let topology = BrokerTopology::market_data();
    broker.ensure_topology(&topology).await?;

    // Subscribe all queues before serving clients
    let manager = ConsumerManager::new(broker.clone()).with_metrics(metrics.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let push: Arc<dyn PushChannel> = hub.clone();
    let spot_handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(SpotCoinsHandler::new(push.clone()));
    let klines_handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(KlinesHandler::new(push.clone()));
    let warmup_handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(WarmupHandler::new(warmup.clone(), push.clone()));

    manager
        .start_consuming(queues::SPOT_COINS, spot_handler, shutdown_rx.clone())
        .await?;
    manager
        .start_consuming(queues::KLINES, klines_handler, shutdown_rx.clone())
        .await?;
    manager
        .start_consuming(queues::WARMUP, warmup_handler, shutdown_rx.clone())
        .await?;
    info!(queues = ?manager.active_queues(), "consumers started");

    // HTTP/WebSocket server for dashboard clients
    let state = AppState {
        hub: hub.clone(),
        warmup: warmup.clone(),
        metrics: metrics.clone(),
        start_time: Arc::new(Instant::now()),
    };
    let app = http::router(state);
    let port = config::get_http_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port = port, "dashboard HTTP server listening");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server error");
        }
    });

    // Graceful shutdown: stop deliveries first, then stop serving
    info!("Dashboard service started, waiting for shutdown signal...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down dashboard service...");
            let _ = shutdown_tx.send(true);
            manager.stop_consuming().await;
            server.abort();
            info!("Dashboard service stopped");
        }
    }

    Ok(())
}

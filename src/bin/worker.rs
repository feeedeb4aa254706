//! Coindeck Worker
//!
//! Runs the scheduled market-data refresh jobs and publishes each job's
//! outcome envelope to the topic exchange. Can run as multiple instances;
//! the consumers downstream are the ones that must stay singletons per
//! queue group.

use backon::{ExponentialBuilder, Retryable};
use coindeck::config;
use coindeck::core::scheduler::JobScheduler;
use coindeck::jobs::market::{KlinesRefreshJob, SpotCoinsCacheWarmupJob, SpotCoinsRefreshJob};
use coindeck::jobs::runner::{JobRunner, RunnableJob};
use coindeck::logging;
use coindeck::messaging::amqp::AmqpBroker;
use coindeck::messaging::broker::MessageBroker;
use coindeck::messaging::publisher::EnvelopePublisher;
use coindeck::messaging::topology::BrokerTopology;
use coindeck::metrics::Metrics;
use coindeck::services::binance::BinanceMarketDataProvider;
use coindeck::services::market_data::MarketDataProvider;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

const KLINE_LIMIT: usize = 500;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env if present
    dotenv().ok();

    // Initialize logging based on environment
    logging::init_logging();

    let env = config::get_environment();
    info!("Starting Coindeck Worker");
    info!(environment = %env, "Environment");

    let refresh_interval = config::get_refresh_interval_seconds();
    if refresh_interval == 0 {
        return Err("REFRESH_INTERVAL_SECONDS must be > 0 for worker".into());
    }

    let symbols = config::get_symbols();
    let kline_interval = config::get_kline_interval();
    info!(
        interval = refresh_interval,
        "Refresh: every {} seconds", refresh_interval
    );
    info!(symbols = ?symbols, "Symbols: {}", symbols.join(", "));

    // Initialize metrics
    let metrics = Arc::new(Metrics::new()?);

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

    // Market data provider producing the job payloads
    let provider: Arc<dyn MarketDataProvider> = Arc::new(BinanceMarketDataProvider::new());

    let source = config::get_source("coindeck-worker");
    let publisher = EnvelopePublisher::new(broker.clone());
    let runner = Arc::new(JobRunner::new(publisher, &source).with_metrics(metrics.clone()));

    // Warm the cache immediately so dashboards can go ready without
    // waiting for the first scheduled tick.
    info!("Running initial cache warmup...");
    let warmup_job = SpotCoinsCacheWarmupJob::new(provider.clone());
    if let Err(e) = runner.invoke(&warmup_job).await {
        warn!(error = %e, "initial warmup run failed");
    }

    let jobs: Vec<Arc<dyn RunnableJob>> = vec![
        Arc::new(SpotCoinsRefreshJob::new(provider.clone())),
        Arc::new(KlinesRefreshJob::new(
            provider.clone(),
            symbols,
            kline_interval,
            KLINE_LIMIT,
        )),
        Arc::new(SpotCoinsCacheWarmupJob::new(provider.clone())),
    ];

    info!("Starting job scheduler...");
    let scheduler = JobScheduler::new(runner, jobs, refresh_interval)
        .map_err(|e| format!("Failed to create scheduler: {}", e))?;
    scheduler.start().await;

    // Graceful shutdown
    info!("Worker started, waiting for shutdown signal...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down worker...");
            scheduler.stop().await;
            info!("Worker stopped");
        }
    }

    Ok(())
}

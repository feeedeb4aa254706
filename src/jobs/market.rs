//! Concrete market-data refresh jobs
//!
//! Provider transport failures are structured failures: the job reports
//! them and the runner recovers them into a failed envelope. A malformed
//! provider payload is a contract violation and travels the unexpected
//! fault path instead, so the scheduling layer sees it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::jobs::runner::{Job, JobError, JobOutcome};
use crate::messaging::topology::routing;
use crate::models::{SpotCoin, SymbolKlines};
use crate::services::market_data::{MarketDataError, MarketDataProvider};

pub const SPOT_COINS_REFRESH_JOB: &str = "Spot Coins Refresh";
pub const KLINES_REFRESH_JOB: &str = "Klines Refresh";
pub const SPOT_COINS_WARMUP_JOB: &str = "Spot Coins Cache Warmup";

/// Periodic refresh of all spot tickers for the dashboard overview.
pub struct SpotCoinsRefreshJob {
    provider: Arc<dyn MarketDataProvider>,
}

impl SpotCoinsRefreshJob {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Job for SpotCoinsRefreshJob {
    type Output = Vec<SpotCoin>;

    fn name(&self) -> &str {
        SPOT_COINS_REFRESH_JOB
    }

    fn routing_key(&self) -> &str {
        routing::SPOT_COINS_REFRESH
    }

    async fn execute(&self) -> Result<JobOutcome<Self::Output>, JobError> {
        match self.provider.spot_coins().await {
            Ok(coins) => Ok(JobOutcome::Completed(coins)),
            Err(e @ MarketDataError::Decode(_)) => Err(JobError::MarketData(e)),
            Err(e) => Ok(JobOutcome::Failed(vec![e.to_string()])),
        }
    }
}

/// Periodic refresh of candle series for the configured symbols.
pub struct KlinesRefreshJob {
    provider: Arc<dyn MarketDataProvider>,
    symbols: Vec<String>,
    interval: String,
    limit: usize,
}

impl KlinesRefreshJob {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        symbols: Vec<String>,
        interval: String,
        limit: usize,
    ) -> Self {
        Self {
            provider,
            symbols,
            interval,
            limit,
        }
    }
}

#[async_trait]
impl Job for KlinesRefreshJob {
    type Output = Vec<SymbolKlines>;

    fn name(&self) -> &str {
        KLINES_REFRESH_JOB
    }

    fn routing_key(&self) -> &str {
        routing::KLINES_REFRESH
    }

    async fn execute(&self) -> Result<JobOutcome<Self::Output>, JobError> {
        let mut series = Vec::with_capacity(self.symbols.len());
        let mut errors = Vec::new();

        for symbol in &self.symbols {
            match self
                .provider
                .klines(symbol, &self.interval, self.limit)
                .await
            {
                Ok(klines) => series.push(SymbolKlines {
                    symbol: symbol.clone(),
                    interval: self.interval.clone(),
                    klines,
                }),
                Err(e @ MarketDataError::Decode(_)) => return Err(JobError::MarketData(e)),
                Err(e) => errors.push(format!("{}: {}", symbol, e)),
            }
        }

        if series.is_empty() && !errors.is_empty() {
            return Ok(JobOutcome::Failed(errors));
        }
        if !errors.is_empty() {
            warn!(
                failed = errors.len(),
                loaded = series.len(),
                "some symbols failed to refresh"
            );
        }
        Ok(JobOutcome::Completed(series))
    }
}

/// Initial cache warmup. Downstream consumers only care about the first
/// successful completion of this job, so it routes to the warmup queue.
pub struct SpotCoinsCacheWarmupJob {
    provider: Arc<dyn MarketDataProvider>,
}

impl SpotCoinsCacheWarmupJob {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Job for SpotCoinsCacheWarmupJob {
    type Output = Vec<SpotCoin>;

    fn name(&self) -> &str {
        SPOT_COINS_WARMUP_JOB
    }

    fn routing_key(&self) -> &str {
        routing::SPOT_COINS_WARMUP
    }

    async fn execute(&self) -> Result<JobOutcome<Self::Output>, JobError> {
        match self.provider.spot_coins().await {
            Ok(coins) if coins.is_empty() => Ok(JobOutcome::Failed(vec![
                "provider returned no spot coins to warm".to_string(),
            ])),
            Ok(coins) => Ok(JobOutcome::Completed(coins)),
            Err(e @ MarketDataError::Decode(_)) => Err(JobError::MarketData(e)),
            Err(e) => Ok(JobOutcome::Failed(vec![e.to_string()])),
        }
    }
}

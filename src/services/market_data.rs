//! Market data provider interface
//!
//! Jobs only see this trait; the concrete REST client lives behind it so
//! tests can substitute a stub provider.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Kline, SpotCoin};

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("upstream returned status {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("malformed provider payload: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// 24h tickers for every listed spot pair.
    async fn spot_coins(&self) -> Result<Vec<SpotCoin>, MarketDataError>;

    /// Recent candles for one symbol at one interval.
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError>;
}

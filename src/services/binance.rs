//! Binance spot REST provider

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::get_binance_base_url;
use crate::models::{Kline, SpotCoin};
use crate::services::market_data::{MarketDataError, MarketDataProvider};

pub struct BinanceMarketDataProvider {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceMarketDataProvider {
    pub fn new() -> Self {
        Self::with_client(get_binance_base_url(), reqwest::Client::new())
    }

    /// Build against an explicit base URL and client (test injection).
    pub fn with_client(base_url: String, client: reqwest::Client) -> Self {
        Self { base_url, client }
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value, MarketDataError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketDataError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| MarketDataError::Decode(e.to_string()))
    }
}

impl Default for BinanceMarketDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// 24h ticker as Binance encodes it: all numerics are strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    price_change_percent: String,
    volume: String,
    quote_volume: String,
    high_price: String,
    low_price: String,
}

impl Ticker24h {
    fn into_spot_coin(self) -> Result<SpotCoin, MarketDataError> {
        Ok(SpotCoin {
            last_price: parse_decimal("lastPrice", &self.last_price)?,
            price_change_percent: parse_decimal("priceChangePercent", &self.price_change_percent)?,
            volume: parse_decimal("volume", &self.volume)?,
            quote_volume: parse_decimal("quoteVolume", &self.quote_volume)?,
            high_price: parse_decimal("highPrice", &self.high_price)?,
            low_price: parse_decimal("lowPrice", &self.low_price)?,
            symbol: self.symbol,
        })
    }
}

fn parse_decimal(field: &str, raw: &str) -> Result<f64, MarketDataError> {
    raw.parse()
        .map_err(|_| MarketDataError::Decode(format!("{} is not a number: '{}'", field, raw)))
}

fn parse_timestamp_ms(field: &str, value: Option<&Value>) -> Result<chrono::DateTime<chrono::Utc>, MarketDataError> {
    value
        .and_then(Value::as_i64)
        .and_then(chrono::DateTime::from_timestamp_millis)
        .ok_or_else(|| MarketDataError::Decode(format!("{} is not a millisecond timestamp", field)))
}

fn parse_decimal_value(field: &str, value: Option<&Value>) -> Result<f64, MarketDataError> {
    match value {
        Some(Value::String(raw)) => parse_decimal(field, raw),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| MarketDataError::Decode(format!("{} is not a number", field))),
        _ => Err(MarketDataError::Decode(format!("{} is missing", field))),
    }
}

#[async_trait]
impl MarketDataProvider for BinanceMarketDataProvider {
    async fn spot_coins(&self) -> Result<Vec<SpotCoin>, MarketDataError> {
        let body = self.get_json("/api/v3/ticker/24hr").await?;
        let tickers: Vec<Ticker24h> = serde_json::from_value(body)
            .map_err(|e| MarketDataError::Decode(e.to_string()))?;

        let coins = tickers
            .into_iter()
            .map(Ticker24h::into_spot_coin)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(count = coins.len(), "fetched spot tickers");
        Ok(coins)
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Kline>, MarketDataError> {
        let body = self
            .get_json(&format!(
                "/api/v3/klines?symbol={}&interval={}&limit={}",
                symbol, interval, limit
            ))
            .await?;

        // Klines arrive as positional arrays:
        // [openTime, open, high, low, close, volume, closeTime, ...]
        let rows: Vec<Vec<Value>> = serde_json::from_value(body)
            .map_err(|e| MarketDataError::Decode(e.to_string()))?;

        let mut klines = Vec::with_capacity(rows.len());
        for row in &rows {
            klines.push(Kline {
                open_time: parse_timestamp_ms("openTime", row.first())?,
                open: parse_decimal_value("open", row.get(1))?,
                high: parse_decimal_value("high", row.get(2))?,
                low: parse_decimal_value("low", row.get(3))?,
                close: parse_decimal_value("close", row.get(4))?,
                volume: parse_decimal_value("volume", row.get(5))?,
                close_time: parse_timestamp_ms("closeTime", row.get(6))?,
            });
        }

        debug!(symbol = %symbol, interval = %interval, count = klines.len(), "fetched klines");
        Ok(klines)
    }
}

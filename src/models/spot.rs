//! Spot market ticker model

use serde::{Deserialize, Serialize};

/// 24h rolling ticker for one spot trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotCoin {
    pub symbol: String,
    pub last_price: f64,
    pub price_change_percent: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub high_price: f64,
    pub low_price: f64,
}

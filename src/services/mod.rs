//! External market-data collaborators

pub mod binance;
pub mod market_data;

pub use binance::BinanceMarketDataProvider;
pub use market_data::{MarketDataError, MarketDataProvider};

//! Shared data models carried in job payloads and pushed to clients.

pub mod kline;
pub mod spot;

pub use kline::{Kline, SymbolKlines};
pub use spot::SpotCoin;

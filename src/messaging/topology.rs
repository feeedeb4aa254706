//! Static broker topology: exchange, durable queues and their bindings

use crate::config::get_exchange_name;

/// Durable queue names consumed by the dashboard service.
pub mod queues {
    pub const SPOT_COINS: &str = "market.spot-coins";
    pub const KLINES: &str = "market.klines";
    pub const WARMUP: &str = "market.warmup";
}

/// Routing keys used by the producer side.
pub mod routing {
    pub const SPOT_COINS_REFRESH: &str = "jobs.spot-coins.refresh";
    pub const KLINES_REFRESH: &str = "jobs.klines.refresh";
    pub const SPOT_COINS_WARMUP: &str = "jobs.warmup.spot-coins";
}

/// One queue bound to the exchange under a routing-key pattern.
///
/// Static configuration; never mutated after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_key: String,
}

impl QueueBinding {
    pub fn new(queue: &str, routing_key: &str) -> Self {
        Self {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        }
    }
}

/// The full topology a process declares at startup.
#[derive(Debug, Clone)]
pub struct BrokerTopology {
    pub exchange: String,
    pub bindings: Vec<QueueBinding>,
}

impl BrokerTopology {
    /// The deployed market-data topology. Binding patterns are topic
    /// wildcards, so additional producers can route into the same queues.
    pub fn market_data() -> Self {
        Self {
            exchange: get_exchange_name(),
            bindings: vec![
                QueueBinding::new(queues::SPOT_COINS, "jobs.spot-coins.*"),
                QueueBinding::new(queues::KLINES, "jobs.klines.*"),
                QueueBinding::new(queues::WARMUP, "jobs.warmup.#"),
            ],
        }
    }
}

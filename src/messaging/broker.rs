//! Broker abstraction consumed by the publisher and consumer manager
//!
//! Mirrors the provider-trait seam used elsewhere in the codebase: callers
//! hold an `Arc<dyn MessageBroker>` and never see the wire client.

use async_trait::async_trait;
use thiserror::Error;

use crate::messaging::topology::BrokerTopology;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("channel setup failed: {0}")]
    Channel(String),
    #[error("topology declaration failed: {0}")]
    Topology(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume setup failed: {0}")]
    Consume(String),
    #[error("acknowledgment failed: {0}")]
    Ack(String),
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare the exchange, the durable queues and their bindings.
    ///
    /// Safe to call repeatedly and from multiple processes; the broker
    /// converges to the same topology.
    async fn ensure_topology(&self, topology: &BrokerTopology) -> Result<(), BrokerError>;

    /// Publish a payload under a routing key. Thin pass-through: no local
    /// buffering, no retry; failures surface to the caller.
    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Open a dedicated channel on `queue` with the given prefetch count
    /// and start delivering. The subscription owns the channel.
    async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn QueueSubscription>, BrokerError>;
}

/// An active per-queue subscription: a delivery stream plus its teardown.
#[async_trait]
pub trait QueueSubscription: Send {
    /// Next delivery, or `None` once the subscription ended.
    async fn next_delivery(&mut self) -> Option<Delivery>;

    /// Stop the broker from sending further deliveries.
    async fn cancel(&mut self) -> Result<(), BrokerError>;

    /// Close the underlying channel. Tolerates being already closed.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// One delivered message and the means to settle it.
pub struct Delivery {
    pub payload: Vec<u8>,
    pub acker: Box<dyn DeliveryAcker>,
}

/// Settles a single delivery; consumed on use so a message cannot be
/// settled twice.
#[async_trait]
pub trait DeliveryAcker: Send {
    /// Positively acknowledge this one message.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Negatively acknowledge; `requeue` controls redelivery vs drop.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError>;
}

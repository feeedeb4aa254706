//! Envelope publisher

use std::sync::Arc;

use tracing::debug;

use crate::messaging::broker::{BrokerError, MessageBroker};
use crate::messaging::envelope::JobEnvelope;

/// Serializes envelopes and hands them to the broker under a routing key.
///
/// Stateless pass-through: no buffering and no retry. A broker failure
/// surfaces to the caller, which decides what a failed publish means.
pub struct EnvelopePublisher {
    broker: Arc<dyn MessageBroker>,
}

impl EnvelopePublisher {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }

    pub async fn publish(
        &self,
        routing_key: &str,
        envelope: &JobEnvelope,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(envelope)?;
        self.broker.publish(routing_key, payload).await?;
        debug!(
            job = %envelope.job_name,
            routing_key = %routing_key,
            success = envelope.success,
            "envelope published"
        );
        Ok(())
    }
}

//! Warmup queue handler

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::warmup::WarmupCoordinator;
use crate::messaging::envelope::JobEnvelope;
use crate::messaging::handler::{HandlerError, MessageHandler};
use crate::push::PushChannel;

/// Flips the warmup gate on the first successful warmup run and tells all
/// connected clients the dashboard is ready.
///
/// The payload is ignored; only the outcome matters. The coordinator's
/// compare-and-set guarantees the "ready" event fires once per process
/// lifetime no matter how many successes arrive or race.
pub struct WarmupHandler {
    warmup: Arc<WarmupCoordinator>,
    push: Arc<dyn PushChannel>,
}

impl WarmupHandler {
    pub fn new(warmup: Arc<WarmupCoordinator>, push: Arc<dyn PushChannel>) -> Self {
        Self { warmup, push }
    }
}

#[async_trait]
impl MessageHandler<JobEnvelope> for WarmupHandler {
    async fn handle(&self, envelope: JobEnvelope) -> Result<(), HandlerError> {
        if !envelope.success {
            warn!(
                job = %envelope.job_name,
                source = %envelope.source,
                error = envelope.error_message.as_deref().unwrap_or("unknown"),
                "warmup job reported failure"
            );
            return Ok(());
        }

        if self.warmup.mark_as_warmed_up() {
            info!(job = %envelope.job_name, "first successful warmup, notifying all clients");
            self.push.broadcast_to_all("ready", Value::Null).await;
        } else {
            debug!(job = %envelope.job_name, "warmup already completed, skipping notification");
        }
        Ok(())
    }
}

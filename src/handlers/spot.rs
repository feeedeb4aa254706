//! Spot ticker queue handler

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::handlers::decode_success_data;
use crate::messaging::envelope::JobEnvelope;
use crate::messaging::handler::{HandlerError, MessageHandler};
use crate::models::SpotCoin;
use crate::push::{PushChannel, SPOT_COINS_GROUP};

/// Forwards refreshed spot tickers to the spot-coins subscriber group.
pub struct SpotCoinsHandler {
    push: Arc<dyn PushChannel>,
}

impl SpotCoinsHandler {
    pub fn new(push: Arc<dyn PushChannel>) -> Self {
        Self { push }
    }
}

#[async_trait]
impl MessageHandler<JobEnvelope> for SpotCoinsHandler {
    async fn handle(&self, envelope: JobEnvelope) -> Result<(), HandlerError> {
        let Some(coins) = decode_success_data::<Vec<SpotCoin>>(&envelope)? else {
            return Ok(());
        };

        let payload =
            serde_json::to_value(&coins).map_err(|e| HandlerError::Other(e.to_string()))?;
        self.push
            .broadcast_to_group(SPOT_COINS_GROUP, "spot-coins-updated", payload)
            .await;

        debug!(count = coins.len(), "spot tickers forwarded to dashboard");
        Ok(())
    }
}

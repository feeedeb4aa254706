//! Kline queue handler

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::handlers::decode_success_data;
use crate::messaging::envelope::JobEnvelope;
use crate::messaging::handler::{HandlerError, MessageHandler};
use crate::models::SymbolKlines;
use crate::push::{PushChannel, KLINES_GROUP};

/// Forwards refreshed candle series to the klines subscriber group.
pub struct KlinesHandler {
    push: Arc<dyn PushChannel>,
}

impl KlinesHandler {
    pub fn new(push: Arc<dyn PushChannel>) -> Self {
        Self { push }
    }
}

#[async_trait]
impl MessageHandler<JobEnvelope> for KlinesHandler {
    async fn handle(&self, envelope: JobEnvelope) -> Result<(), HandlerError> {
        let Some(series) = decode_success_data::<Vec<SymbolKlines>>(&envelope)? else {
            return Ok(());
        };

        let payload =
            serde_json::to_value(&series).map_err(|e| HandlerError::Other(e.to_string()))?;
        self.push
            .broadcast_to_group(KLINES_GROUP, "klines-updated", payload)
            .await;

        debug!(symbols = series.len(), "klines forwarded to dashboard");
        Ok(())
    }
}

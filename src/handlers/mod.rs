//! Per-queue envelope handlers
//!
//! Each durable queue gets one handler. They share the envelope base
//! behavior: failure envelopes are logged and acknowledged (the envelope
//! is the whole story), success envelopes have their payload decoded into
//! the handler's expected type before dispatch.

pub mod kline;
pub mod spot;
pub mod warmup;

pub use kline::KlinesHandler;
pub use spot::SpotCoinsHandler;
pub use warmup::WarmupHandler;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::messaging::envelope::JobEnvelope;
use crate::messaging::handler::HandlerError;

/// Shared base step for handlers expecting a typed payload.
///
/// `Ok(None)` means there is nothing to dispatch: either the job failed
/// (logged, not an error — redelivery cannot fix a failed job) or it
/// succeeded without data. Decode failures surface as structured errors.
pub(crate) fn decode_success_data<T: DeserializeOwned>(
    envelope: &JobEnvelope,
) -> Result<Option<T>, HandlerError> {
    if !envelope.success {
        warn!(
            job = %envelope.job_name,
            source = %envelope.source,
            error = envelope.error_message.as_deref().unwrap_or("unknown"),
            "job reported failure"
        );
        return Ok(None);
    }

    match envelope.decode_data::<T>()? {
        None => {
            info!(job = %envelope.job_name, "job succeeded without data");
            Ok(None)
        }
        Some(data) => Ok(Some(data)),
    }
}

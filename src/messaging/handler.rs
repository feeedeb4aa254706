//! Handler seam and acknowledgment classification

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a message handler.
///
/// The variants form a closed set so the consumer can map every failure to
/// an acknowledgment action without inspecting error sources.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid message: {0}")]
    Validation(String),
    #[error("payload decode failed: {0}")]
    Deserialization(String),
    #[error("handler timed out: {0}")]
    Timeout(String),
    #[error("handler cancelled: {0}")]
    Cancelled(String),
    #[error("{0}")]
    Other(String),
}

/// What the consumer does with a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Negative acknowledgment without requeue; the message is discarded.
    Drop,
    /// Negative acknowledgment with requeue for redelivery.
    Requeue,
}

/// Map a handler failure to an acknowledgment action.
///
/// Malformed input will not get better on redelivery, so validation and
/// decode failures drop. Everything else is assumed transient and
/// requeues, including unclassified errors.
pub fn classify_failure(error: &HandlerError) -> AckAction {
    match error {
        HandlerError::Validation(_) | HandlerError::Deserialization(_) => AckAction::Drop,
        HandlerError::Timeout(_) | HandlerError::Cancelled(_) | HandlerError::Other(_) => {
            AckAction::Requeue
        }
    }
}

/// Typed message handler registered per queue.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    async fn handle(&self, message: T) -> Result<(), HandlerError>;
}

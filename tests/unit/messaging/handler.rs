//! Unit tests for failure classification

use coindeck::messaging::handler::{classify_failure, AckAction, HandlerError};

#[test]
fn validation_failures_drop() {
    let action = classify_failure(&HandlerError::Validation("empty symbol".into()));
    assert_eq!(action, AckAction::Drop);
}

#[test]
fn deserialization_failures_drop() {
    let action = classify_failure(&HandlerError::Deserialization("expected array".into()));
    assert_eq!(action, AckAction::Drop);
}

#[test]
fn timeouts_requeue() {
    let action = classify_failure(&HandlerError::Timeout("push stalled".into()));
    assert_eq!(action, AckAction::Requeue);
}

#[test]
fn cancellations_requeue() {
    let action = classify_failure(&HandlerError::Cancelled("shutting down".into()));
    assert_eq!(action, AckAction::Requeue);
}

#[test]
fn unclassified_failures_requeue() {
    // Conservative default: assume transient.
    let action = classify_failure(&HandlerError::Other("who knows".into()));
    assert_eq!(action, AckAction::Requeue);
}

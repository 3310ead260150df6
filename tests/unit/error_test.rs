//! Tests for error types

use lead_queue::core::{ItemStatus, QueueError, SendError, StoreError};

#[test]
fn test_capacity_exhausted_error() {
    let err = QueueError::CapacityExhausted { horizon_days: 30 };
    assert_eq!(format!("{err}"), "capacity exhausted within 30 working days");
    assert!(!err.is_transient());
}

#[test]
fn test_invalid_transition_error() {
    let err = QueueError::InvalidTransition {
        from: ItemStatus::Completed,
        to: ItemStatus::Queued,
    };
    assert_eq!(format!("{err}"), "invalid transition from completed to queued");
    assert!(!err.is_transient());
}

#[test]
fn test_store_conflict_maps_to_already_queued() {
    let err: QueueError = StoreError::Conflict("lead-7".into()).into();
    assert!(matches!(err, QueueError::AlreadyQueued(ref s) if s == "lead-7"));
}

#[test]
fn test_store_outage_is_transient() {
    let err: QueueError = StoreError::Unavailable("timeout".into()).into();
    assert!(matches!(err, QueueError::Persistence(_)));
    assert!(err.is_transient());
}

#[test]
fn test_send_errors_are_transient() {
    let err: QueueError = SendError::Timeout.into();
    assert_eq!(format!("{err}"), "send failure: send timed out");
    assert!(err.is_transient());
}

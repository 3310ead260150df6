//! Error types for queue operations.

use thiserror::Error;

use crate::core::item::{ItemId, ItemStatus};

/// Errors produced by queue components.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No capacity left within the scheduling horizon.
    #[error("capacity exhausted within {horizon_days} working days")]
    CapacityExhausted {
        /// Horizon that was searched.
        horizon_days: u32,
    },
    /// Attempted status change is not allowed by the state machine.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Status the item was in.
        from: ItemStatus,
        /// Status that was requested.
        to: ItemStatus,
    },
    /// Outbound send failed or timed out.
    #[error("send failure: {0}")]
    SendFailure(String),
    /// Persistence collaborator failed after retries.
    #[error("persistence failure: {0}")]
    Persistence(String),
    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Subject already has an active item.
    #[error("subject {0} already queued")]
    AlreadyQueued(String),
    /// Item does not exist.
    #[error("item {0} not found")]
    NotFound(ItemId),
}

impl QueueError {
    /// Whether the failed operation may be retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SendFailure(_) | Self::Persistence(_))
    }
}

/// Errors reported by persistence backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// An active item already exists for the subject.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for QueueError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(subject) => Self::AlreadyQueued(subject),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Errors reported by message senders.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Provider refused the message.
    #[error("rejected by provider: {0}")]
    Rejected(String),
    /// Network or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call did not finish within the configured timeout.
    #[error("send timed out")]
    Timeout,
}

impl From<SendError> for QueueError {
    fn from(err: SendError) -> Self {
        Self::SendFailure(err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

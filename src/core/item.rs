//! Queue item model.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a queue item.
pub type ItemId = Uuid;

/// Opaque reference to the lead being processed.
pub type SubjectId = String;

/// Status of an item in the queue lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Created, not yet placed on a day.
    Pending,
    /// Placed on a day, waiting for dispatch.
    Queued,
    /// Claimed by a dispatcher, send in flight.
    Processing,
    /// Sent successfully.
    Completed,
    /// Last send failed.
    Failed,
    /// Withdrawn before dispatch.
    Cancelled,
}

impl ItemStatus {
    /// Statuses that block a second item for the same subject.
    pub const ACTIVE: [Self; 3] = [Self::Pending, Self::Queued, Self::Processing];

    /// Lowercase name used in logs and wire formats.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the status counts as active for duplicate detection.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Processing)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item priority; only affects ordering within a capacity window.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest priority.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Elevated priority.
    High,
    /// Highest priority.
    Urgent,
}

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier, also used as the send idempotency key.
    pub id: ItemId,
    /// Lead reference.
    pub subject_id: SubjectId,
    /// Current status.
    pub status: ItemStatus,
    /// Bumped on every status transition; guards compare-and-set writes.
    #[serde(default)]
    pub version: u64,
    /// Ordering priority.
    pub priority: Priority,
    /// Instant the item becomes eligible for dispatch.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Failed attempts consumed so far.
    pub attempts: u32,
    /// Attempts allowed before the item is dead-lettered.
    pub max_attempts: u32,
    /// Batch submission instant.
    pub created_at: DateTime<Utc>,
    /// Arrival index within the submitting batch.
    pub sequence: u64,
    /// Set when the item first enters `queued`.
    pub queued_at: Option<DateTime<Utc>>,
    /// Set when a dispatcher claims the item.
    pub processed_at: Option<DateTime<Utc>>,
    /// Set on successful completion.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on every failed outcome.
    pub failed_at: Option<DateTime<Utc>>,
    /// Set on cancellation.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Most recent failure reason.
    pub last_error: Option<String>,
    /// Message id returned by the provider on success.
    pub provider_message_id: Option<String>,
    /// Opaque caller data (source, batch id, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl QueueItem {
    /// Create a pending item for a subject.
    pub fn new(
        subject_id: impl Into<SubjectId>,
        priority: Priority,
        max_attempts: u32,
        created_at: DateTime<Utc>,
        sequence: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            status: ItemStatus::Pending,
            version: 0,
            priority,
            scheduled_for: None,
            attempts: 0,
            max_attempts,
            created_at,
            sequence,
            queued_at: None,
            processed_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            last_error: None,
            provider_message_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Failed with no retries left.
    pub const fn is_hard_failure(&self) -> bool {
        matches!(self.status, ItemStatus::Failed) && self.attempts >= self.max_attempts
    }

    /// Whether the item can never change again.
    pub const fn is_terminal(&self) -> bool {
        match self.status {
            ItemStatus::Completed | ItemStatus::Cancelled => true,
            ItemStatus::Failed => self.attempts >= self.max_attempts,
            _ => false,
        }
    }

    /// Ordering used for distribution and dispatch: priority descending, then arrival.
    pub fn dispatch_order(a: &Self, b: &Self) -> std::cmp::Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.sequence.cmp(&b.sequence))
    }
}

//! Queue item state machine.
//!
//! ```text
//! pending ──> queued ──> processing ──> completed
//!    │          │  ▲           │
//!    │          │  └── retry ──┤
//!    ▼          ▼              ▼
//! cancelled  cancelled       failed (terminal once attempts == max_attempts)
//! ```
//!
//! Transition checks happen before any field is touched, so a rejected
//! transition leaves the item exactly as it was.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::config::RetryConfig;
use crate::core::calendar::BusinessCalendar;
use crate::core::capacity::CapacityLedger;
use crate::core::item::{ItemStatus, QueueItem};
use crate::core::QueueError;

/// What happened to an item after a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-entered `queued` on a new date.
    Retrying {
        /// New dispatch instant.
        scheduled_for: DateTime<Utc>,
        /// Business date whose capacity the item now holds.
        date: NaiveDate,
        /// The unit already held on `date` was kept instead of reserving a new one.
        carried: bool,
    },
    /// Out of attempts; permanently `failed`.
    DeadLettered,
    /// Attempts remain but no capacity was found within the horizon;
    /// left `failed` until a later sweep finds room.
    Unschedulable,
}

/// Whether `from -> to` is legal for `item`.
pub const fn is_allowed(item: &QueueItem, to: ItemStatus) -> bool {
    use ItemStatus::{Cancelled, Completed, Failed, Pending, Processing, Queued};
    match (item.status, to) {
        (Pending, Queued | Cancelled)
        | (Queued, Processing | Cancelled)
        | (Processing, Completed | Failed) => true,
        (Failed, Queued) => item.attempts < item.max_attempts,
        _ => false,
    }
}

fn transition(item: &mut QueueItem, to: ItemStatus) -> Result<(), QueueError> {
    if !is_allowed(item, to) {
        return Err(QueueError::InvalidTransition {
            from: item.status,
            to,
        });
    }
    item.status = to;
    item.version = item.version.wrapping_add(1);
    Ok(())
}

/// `pending|failed -> queued` with a dispatch instant no earlier than `now`.
pub fn enqueue(
    item: &mut QueueItem,
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), QueueError> {
    transition(item, ItemStatus::Queued)?;
    item.scheduled_for = Some(scheduled_for.max(now));
    if item.queued_at.is_none() {
        item.queued_at = Some(now);
    }
    Ok(())
}

/// `queued -> processing`.
pub fn claim(item: &mut QueueItem, now: DateTime<Utc>) -> Result<(), QueueError> {
    transition(item, ItemStatus::Processing)?;
    item.processed_at = Some(now);
    Ok(())
}

/// `processing -> completed`.
pub fn complete(
    item: &mut QueueItem,
    now: DateTime<Utc>,
    provider_message_id: Option<String>,
) -> Result<(), QueueError> {
    transition(item, ItemStatus::Completed)?;
    item.completed_at = Some(now);
    item.provider_message_id = provider_message_id;
    Ok(())
}

/// `processing -> failed`, consuming one attempt.
pub fn fail(
    item: &mut QueueItem,
    now: DateTime<Utc>,
    reason: impl Into<String>,
) -> Result<(), QueueError> {
    transition(item, ItemStatus::Failed)?;
    item.attempts = (item.attempts + 1).min(item.max_attempts);
    item.failed_at = Some(now);
    item.last_error = Some(reason.into());
    Ok(())
}

/// `pending|queued -> cancelled`.
pub fn cancel(item: &mut QueueItem, now: DateTime<Utc>) -> Result<(), QueueError> {
    transition(item, ItemStatus::Cancelled)?;
    item.cancelled_at = Some(now);
    Ok(())
}

/// Retry bookkeeping that needs the calendar and the ledger.
pub struct QueueStateMachine {
    calendar: Arc<BusinessCalendar>,
    ledger: Arc<CapacityLedger>,
    retry: RetryConfig,
    horizon_days: u32,
}

impl QueueStateMachine {
    /// Create a state machine over shared scheduling components.
    pub const fn new(
        calendar: Arc<BusinessCalendar>,
        ledger: Arc<CapacityLedger>,
        retry: RetryConfig,
        horizon_days: u32,
    ) -> Self {
        Self {
            calendar,
            ledger,
            retry,
            horizon_days,
        }
    }

    /// Business date whose capacity `item` currently holds.
    pub fn reserved_date(&self, item: &QueueItem) -> Option<NaiveDate> {
        item.scheduled_for.map(|at| self.calendar.local_date(at))
    }

    /// Record a failed send and, when attempts remain, move the item back to
    /// `queued` after linear backoff on a day with free capacity.
    ///
    /// A retry landing on the date the item already holds keeps that unit.
    /// Any other date is reserved here; once the caller has tried to persist
    /// the item it must call [`Self::settle`] so the right date is returned.
    pub async fn fail_and_retry(
        &self,
        item: &mut QueueItem,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureDisposition, QueueError> {
        let held = self.reserved_date(item);
        fail(item, now, reason)?;

        if item.attempts >= item.max_attempts {
            tracing::warn!(
                item_id = %item.id,
                subject_id = %item.subject_id,
                attempts = item.attempts,
                %reason,
                "item dead-lettered"
            );
            return Ok(FailureDisposition::DeadLettered);
        }

        if let Some(disposition) = self.schedule_retry(item, held, now).await? {
            return Ok(disposition);
        }
        item.last_error = Some(format!(
            "{reason}; retry not scheduled: capacity exhausted within {} working days",
            self.horizon_days
        ));
        Ok(FailureDisposition::Unschedulable)
    }

    /// Move a `failed` item with attempts left back to `queued`.
    ///
    /// The item holds no capacity while `failed`, so any date found is
    /// freshly reserved. Returns `Unschedulable` and leaves the item
    /// untouched when the horizon is still full.
    pub async fn requeue_failed(
        &self,
        item: &mut QueueItem,
        now: DateTime<Utc>,
    ) -> Result<FailureDisposition, QueueError> {
        if item.status != ItemStatus::Failed || !is_allowed(item, ItemStatus::Queued) {
            return Err(QueueError::InvalidTransition {
                from: item.status,
                to: ItemStatus::Queued,
            });
        }
        Ok(self
            .schedule_retry(item, None, now)
            .await?
            .unwrap_or(FailureDisposition::Unschedulable))
    }

    async fn schedule_retry(
        &self,
        item: &mut QueueItem,
        held: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureDisposition>, QueueError> {
        let backoff = chrono::Duration::from_std(self.retry.backoff(item.attempts))
            .map_err(|e| QueueError::Configuration(format!("backoff out of range: {e}")))?;
        let ready = item
            .failed_at
            .unwrap_or(now)
            .checked_add_signed(backoff)
            .ok_or_else(|| QueueError::Configuration("backoff overflows the calendar".into()))?
            .max(now);
        let earliest = self.calendar.next_working_instant(ready)?;
        let first_date = self.calendar.local_date(earliest);

        for date in self
            .calendar
            .working_days_from(first_date)
            .take(self.horizon_days as usize)
        {
            let carried = held == Some(date);
            if !carried && self.ledger.reserve(date, 1).await? == 0 {
                continue;
            }
            let scheduled_for = if date == first_date {
                earliest
            } else {
                self.calendar.opening_instant(date)
            };
            enqueue(item, scheduled_for, now)?;
            tracing::info!(
                item_id = %item.id,
                attempts = item.attempts,
                max_attempts = item.max_attempts,
                %scheduled_for,
                carried,
                "retry scheduled"
            );
            return Ok(Some(FailureDisposition::Retrying {
                scheduled_for,
                date,
                carried,
            }));
        }

        tracing::warn!(
            item_id = %item.id,
            horizon_days = self.horizon_days,
            "no capacity for retry within horizon"
        );
        Ok(None)
    }

    /// Return capacity after a failure outcome was (or was not) persisted.
    ///
    /// Persisted: the item left `previous`, so that date is released unless
    /// the retry carried it. Not persisted: the store still shows the old
    /// state, so a fresh retry reservation is released instead.
    pub async fn settle(
        &self,
        previous: Option<NaiveDate>,
        disposition: FailureDisposition,
        persisted: bool,
    ) {
        let date = match (persisted, disposition) {
            (_, FailureDisposition::Retrying { carried: true, .. }) => None,
            (true, _) => previous,
            (false, FailureDisposition::Retrying { date, .. }) => Some(date),
            (false, _) => None,
        };
        self.release(date).await;
    }

    /// Release one unit held by an item that is leaving its date for good.
    pub async fn release(&self, date: Option<NaiveDate>) {
        if let Some(date) = date {
            if let Err(e) = self.ledger.release(date, 1).await {
                tracing::error!(%date, error = %e, "failed to release capacity");
            }
        }
    }
}

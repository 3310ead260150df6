//! Distribution engine: places pending items on business days.
//!
//! Items are ordered by priority and arrival, then poured into working days
//! starting at the next working instant. Each day grants whatever the ledger
//! reserves; leftovers roll to the next working day until the horizon is
//! exhausted, after which they are rejected rather than dropped.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CapacityConfig, PersistenceConfig};
use crate::core::calendar::BusinessCalendar;
use crate::core::capacity::{CapacityLedger, CapacitySnapshot};
use crate::core::item::{ItemId, ItemStatus, Priority, QueueItem, SubjectId};
use crate::core::state_machine;
use crate::core::store::QueueStore;
use crate::core::{QueueError, StoreError};
use crate::util::retry::call_store;

/// An item placed on a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Placed item.
    pub item_id: ItemId,
    /// Lead reference.
    pub subject_id: SubjectId,
    /// Item priority.
    pub priority: Priority,
    /// Dispatch instant.
    pub scheduled_for: DateTime<Utc>,
    /// Business date whose capacity the item holds.
    pub date: NaiveDate,
}

/// Why a candidate was not scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The subject already has an active item.
    AlreadyQueued,
    /// No capacity within the scheduling horizon.
    CapacityExhausted,
    /// The store could not persist the placement.
    PersistenceFailure,
    /// The item was not in a schedulable status.
    InvalidTransition,
}

/// A candidate that was not scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Lead reference.
    pub subject_id: SubjectId,
    /// Item id, when an item had been created for the candidate.
    pub item_id: Option<ItemId>,
    /// Rejection category.
    pub reason: RejectionReason,
    /// Human-readable detail.
    pub detail: Option<String>,
}

impl Rejection {
    fn for_item(item: &QueueItem, reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            subject_id: item.subject_id.clone(),
            item_id: Some(item.id),
            reason,
            detail: Some(detail.into()),
        }
    }
}

/// Result of one distribution run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionOutcome {
    /// Items placed, in placement order.
    pub scheduled: Vec<Assignment>,
    /// Items not placed.
    pub rejected: Vec<Rejection>,
}

impl DistributionOutcome {
    /// Number of scheduled items per date, in date order.
    pub fn per_day(&self) -> Vec<(NaiveDate, usize)> {
        let mut counts: Vec<(NaiveDate, usize)> = Vec::new();
        for a in &self.scheduled {
            match counts.iter_mut().find(|(d, _)| *d == a.date) {
                Some((_, n)) => *n += 1,
                None => counts.push((a.date, 1)),
            }
        }
        counts.sort_by_key(|(d, _)| *d);
        counts
    }
}

/// Assigns pending items to business days against the capacity ledger.
pub struct DistributionEngine {
    store: Arc<dyn QueueStore>,
    ledger: Arc<CapacityLedger>,
    calendar: Arc<BusinessCalendar>,
    capacity: CapacityConfig,
    persistence: PersistenceConfig,
}

impl DistributionEngine {
    /// Create an engine over shared components.
    pub fn new(
        store: Arc<dyn QueueStore>,
        ledger: Arc<CapacityLedger>,
        calendar: Arc<BusinessCalendar>,
        capacity: CapacityConfig,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            calendar,
            capacity,
            persistence,
        }
    }

    /// Scheduling horizon in working days.
    pub const fn horizon_days(&self) -> u32 {
        self.capacity.horizon_days
    }

    /// Split off items that are not `pending` and sort the rest.
    fn prepare(items: Vec<QueueItem>) -> (Vec<QueueItem>, Vec<Rejection>) {
        let (mut pending, invalid): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|i| i.status == ItemStatus::Pending);
        pending.sort_by(QueueItem::dispatch_order);
        let rejected = invalid
            .iter()
            .map(|i| {
                Rejection::for_item(
                    i,
                    RejectionReason::InvalidTransition,
                    format!("item is {}, expected pending", i.status),
                )
            })
            .collect();
        (pending, rejected)
    }

    fn scheduled_for(
        &self,
        date: NaiveDate,
        first_date: NaiveDate,
        first_instant: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if date == first_date {
            first_instant
        } else {
            self.calendar.opening_instant(date)
        }
    }

    fn exhausted(&self, leftovers: impl IntoIterator<Item = QueueItem>) -> Vec<Rejection> {
        let detail = QueueError::CapacityExhausted {
            horizon_days: self.capacity.horizon_days,
        }
        .to_string();
        leftovers
            .into_iter()
            .map(|i| Rejection::for_item(&i, RejectionReason::CapacityExhausted, detail.as_str()))
            .collect()
    }

    /// Place `items` on working days, reserving capacity and persisting each
    /// placement.
    ///
    /// A failed insert releases its reservation and rejects the item; an
    /// item is never left holding capacity without being persisted.
    pub async fn distribute(
        &self,
        items: Vec<QueueItem>,
        now: DateTime<Utc>,
    ) -> Result<DistributionOutcome, QueueError> {
        let (pending, mut rejected) = Self::prepare(items);
        let mut outcome = DistributionOutcome::default();
        if pending.is_empty() {
            outcome.rejected = rejected;
            return Ok(outcome);
        }

        let first_instant = self.calendar.next_working_instant(now)?;
        let first_date = self.calendar.local_date(first_instant);
        let mut remaining = pending.into_iter();

        for date in self
            .calendar
            .working_days_from(first_date)
            .take(self.capacity.horizon_days as usize)
        {
            let wanted = u32::try_from(remaining.len()).unwrap_or(u32::MAX);
            if wanted == 0 {
                break;
            }
            let granted = match self.ledger.reserve(date, wanted).await {
                Ok(granted) => granted,
                Err(e) => {
                    tracing::error!(%date, error = %e, "capacity reservation failed");
                    rejected.extend(remaining.by_ref().map(|i| {
                        Rejection::for_item(&i, RejectionReason::PersistenceFailure, e.to_string())
                    }));
                    break;
                }
            };
            if granted == 0 {
                continue;
            }

            let scheduled_for = self.scheduled_for(date, first_date, first_instant);
            for mut item in remaining.by_ref().take(granted as usize) {
                state_machine::enqueue(&mut item, scheduled_for, now)?;
                match self.persist(&item).await {
                    Ok(()) => {
                        tracing::debug!(
                            item_id = %item.id,
                            subject_id = %item.subject_id,
                            priority = ?item.priority,
                            %date,
                            "item scheduled"
                        );
                        outcome.scheduled.push(Assignment {
                            item_id: item.id,
                            subject_id: item.subject_id.clone(),
                            priority: item.priority,
                            scheduled_for,
                            date,
                        });
                    }
                    Err(err) => {
                        if let Err(e) = self.ledger.release(date, 1).await {
                            tracing::error!(%date, error = %e, "failed to release capacity");
                        }
                        let reason = match err {
                            StoreError::Conflict(_) => RejectionReason::AlreadyQueued,
                            _ => RejectionReason::PersistenceFailure,
                        };
                        tracing::warn!(
                            subject_id = %item.subject_id,
                            ?reason,
                            error = %err,
                            "placement rejected"
                        );
                        rejected.push(Rejection::for_item(&item, reason, err.to_string()));
                    }
                }
            }
        }

        let leftovers: Vec<_> = remaining.collect();
        if !leftovers.is_empty() {
            tracing::warn!(
                count = leftovers.len(),
                horizon_days = self.capacity.horizon_days,
                "capacity exhausted within horizon"
            );
            rejected.extend(self.exhausted(leftovers));
        }

        tracing::info!(
            scheduled = outcome.scheduled.len(),
            rejected = rejected.len(),
            "distribution finished"
        );
        outcome.rejected = rejected;
        Ok(outcome)
    }

    async fn persist(&self, item: &QueueItem) -> Result<(), StoreError> {
        call_store(&self.persistence, "insert_item", || self.store.insert_item(item)).await
    }

    /// Plan `items` against `snapshot` without touching the store.
    ///
    /// Uses the same ordering and overflow rules as [`Self::distribute`];
    /// identical inputs always yield identical assignments.
    pub fn dry_run(
        &self,
        items: Vec<QueueItem>,
        snapshot: &mut CapacitySnapshot,
        now: DateTime<Utc>,
    ) -> Result<DistributionOutcome, QueueError> {
        let (pending, rejected) = Self::prepare(items);
        let mut outcome = DistributionOutcome {
            scheduled: Vec::new(),
            rejected,
        };
        if pending.is_empty() {
            return Ok(outcome);
        }

        let first_instant = self.calendar.next_working_instant(now)?;
        let first_date = self.calendar.local_date(first_instant);
        let mut remaining = pending.into_iter().peekable();

        for date in self
            .calendar
            .working_days_from(first_date)
            .take(self.capacity.horizon_days as usize)
        {
            if remaining.peek().is_none() {
                break;
            }
            let wanted = u32::try_from(remaining.len()).unwrap_or(u32::MAX);
            let granted = snapshot.reserve(date, wanted);
            let scheduled_for = self.scheduled_for(date, first_date, first_instant);
            outcome
                .scheduled
                .extend(remaining.by_ref().take(granted as usize).map(|item| Assignment {
                    item_id: item.id,
                    subject_id: item.subject_id,
                    priority: item.priority,
                    scheduled_for,
                    date,
                }));
        }
        outcome.rejected.extend(self.exhausted(remaining));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusinessDayPolicy;
    use crate::core::store::ItemFilter;
    use crate::infra::store::InMemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        // Thursday 10:00
        Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn engine(store: Arc<InMemoryStore>, daily_limit: u32, horizon_days: u32) -> DistributionEngine {
        let capacity = CapacityConfig {
            daily_limit,
            horizon_days,
            ..CapacityConfig::default()
        };
        let ledger = Arc::new(CapacityLedger::new(
            store.clone(),
            &capacity,
            PersistenceConfig::default(),
        ));
        let calendar = Arc::new(BusinessCalendar::new(BusinessDayPolicy::default()).unwrap());
        DistributionEngine::new(store, ledger, calendar, capacity, PersistenceConfig::default())
    }

    fn items(n: usize) -> Vec<QueueItem> {
        (0..n)
            .map(|i| QueueItem::new(format!("lead-{i}"), Priority::Medium, 3, now(), i as u64))
            .collect()
    }

    #[tokio::test]
    async fn overflow_rolls_to_next_working_day() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone(), 2, 5);
        let outcome = engine.distribute(items(5), now()).await.unwrap();
        assert!(outcome.rejected.is_empty());
        assert_eq!(
            outcome.per_day(),
            vec![(date(15), 2), (date(16), 2), (date(19), 1)]
        );
        // First day keeps the current instant, later days open at 09:00.
        assert_eq!(outcome.scheduled[0].scheduled_for, now());
        assert_eq!(
            outcome.scheduled[4].scheduled_for,
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
        );
        let queued = store
            .load_items(&ItemFilter::with_statuses([ItemStatus::Queued]))
            .await
            .unwrap();
        assert_eq!(queued.len(), 5);
    }

    #[tokio::test]
    async fn urgent_items_take_the_earliest_slots() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store, 1, 5);
        let mut batch = items(2);
        batch[1].priority = Priority::Urgent;
        let urgent = batch[1].subject_id.clone();
        let outcome = engine.distribute(batch, now()).await.unwrap();
        assert_eq!(outcome.scheduled[0].subject_id, urgent);
        assert_eq!(outcome.scheduled[0].date, date(15));
    }

    #[tokio::test]
    async fn leftovers_beyond_horizon_are_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store, 2, 1);
        let outcome = engine.distribute(items(3), now()).await.unwrap();
        assert_eq!(outcome.scheduled.len(), 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectionReason::CapacityExhausted);
    }

    #[tokio::test]
    async fn conflicting_subject_releases_its_reservation() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone(), 10, 5);
        engine.distribute(items(1), now()).await.unwrap();
        let outcome = engine.distribute(items(2), now()).await.unwrap();
        assert_eq!(outcome.scheduled.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectionReason::AlreadyQueued);
        assert_eq!(store.windows_snapshot()[0].committed, 2);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_everything() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let engine = engine(store, 10, 5);
        let outcome = engine.distribute(items(3), now()).await.unwrap();
        assert!(outcome.scheduled.is_empty());
        assert!(outcome
            .rejected
            .iter()
            .all(|r| r.reason == RejectionReason::PersistenceFailure));
    }

    #[tokio::test]
    async fn non_pending_items_are_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store, 10, 5);
        let mut batch = items(2);
        batch[0].status = ItemStatus::Completed;
        let outcome = engine.distribute(batch, now()).await.unwrap();
        assert_eq!(outcome.scheduled.len(), 1);
        assert_eq!(outcome.rejected[0].reason, RejectionReason::InvalidTransition);
    }

    #[test]
    fn dry_run_is_deterministic() {
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store, 3, 5);
        let batch = items(7);
        let snapshot = CapacitySnapshot::new(3, None, []);
        let first = engine
            .dry_run(batch.clone(), &mut snapshot.clone(), now())
            .unwrap();
        let second = engine.dry_run(batch, &mut snapshot.clone(), now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.per_day(),
            vec![(date(15), 3), (date(16), 3), (date(19), 1)]
        );
    }
}

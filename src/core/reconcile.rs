//! Sweep for items stuck in `processing` or waiting for retry capacity.
//!
//! An item stays `processing` only when the process died mid-send or its
//! outcome could not be written. The sweep treats such items as failed
//! sends, which retries or dead-letters them through the normal path.
//!
//! A `failed` item with attempts left found no capacity when it last
//! failed. The sweep tries to place it again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DispatchConfig, PersistenceConfig};
use crate::core::dispatcher::record_failure;
use crate::core::item::{ItemStatus, QueueItem};
use crate::core::state_machine::{FailureDisposition, QueueStateMachine};
use crate::core::store::{ItemFilter, QueueStore};
use crate::core::QueueError;
use crate::util::clock::Clock;
use crate::util::retry::call_store;

const STALE_REASON: &str = "no outcome recorded before processing went stale";

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// `processing` items inspected.
    pub examined: usize,
    /// Stale items re-queued.
    pub retried: usize,
    /// Stale items out of attempts.
    pub dead_lettered: usize,
    /// Stale items left `failed` for lack of capacity.
    pub unschedulable: usize,
    /// Stale items whose outcome could not be written.
    pub errors: usize,
    /// Failed items with attempts left that were placed on a day.
    pub requeued: usize,
    /// Failed items with attempts left that still found no capacity.
    pub awaiting_capacity: usize,
}

/// Resolves items left in `processing` past the staleness threshold.
pub struct Reconciler {
    store: Arc<dyn QueueStore>,
    state_machine: Arc<QueueStateMachine>,
    clock: Arc<dyn Clock>,
    dispatch: DispatchConfig,
    persistence: PersistenceConfig,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        store: Arc<dyn QueueStore>,
        state_machine: Arc<QueueStateMachine>,
        clock: Arc<dyn Clock>,
        dispatch: DispatchConfig,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            store,
            state_machine,
            clock,
            dispatch,
            persistence,
        }
    }

    /// Fail every `processing` item claimed more than
    /// `stale_processing_secs` ago, then re-queue `failed` items that still
    /// have attempts left.
    pub async fn sweep(&self) -> Result<ReconcileReport, QueueError> {
        let now = self.clock.now();
        let cutoff = i64::try_from(self.dispatch.stale_processing_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let filter = ItemFilter::with_statuses([ItemStatus::Processing]);
        let items = call_store(&self.persistence, "load_items", || {
            self.store.load_items(&filter)
        })
        .await?;

        let mut report = ReconcileReport::default();
        for item in items {
            report.examined += 1;
            if item.processed_at.is_some_and(|at| at > cutoff) {
                continue;
            }
            tracing::warn!(
                item_id = %item.id,
                processed_at = ?item.processed_at,
                "reconciling stale processing item"
            );
            match record_failure(
                &self.state_machine,
                self.store.as_ref(),
                &self.persistence,
                item,
                STALE_REASON,
                now,
            )
            .await
            {
                Ok(FailureDisposition::Retrying { .. }) => report.retried += 1,
                Ok(FailureDisposition::DeadLettered) => report.dead_lettered += 1,
                Ok(FailureDisposition::Unschedulable) => report.unschedulable += 1,
                Err(_) => report.errors += 1,
            }
        }

        self.requeue_failed(now, &mut report).await?;
        if report.examined > 0 || report.requeued > 0 || report.awaiting_capacity > 0 {
            tracing::info!(
                examined = report.examined,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                errors = report.errors,
                requeued = report.requeued,
                awaiting_capacity = report.awaiting_capacity,
                "reconcile sweep finished"
            );
        }
        Ok(report)
    }

    async fn requeue_failed(
        &self,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<(), QueueError> {
        let filter = ItemFilter::with_statuses([ItemStatus::Failed]);
        let mut failed = call_store(&self.persistence, "load_items", || {
            self.store.load_items(&filter)
        })
        .await?;
        failed.retain(|item| !item.is_terminal());
        failed.sort_by(QueueItem::dispatch_order);

        for mut item in failed {
            let loaded_version = item.version;
            let date = match self.state_machine.requeue_failed(&mut item, now).await {
                Ok(FailureDisposition::Retrying { date, .. }) => date,
                Ok(_) => {
                    report.awaiting_capacity += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "cannot requeue failed item");
                    report.errors += 1;
                    continue;
                }
            };
            let swapped = call_store(&self.persistence, "compare_and_set_item", || {
                self.store
                    .compare_and_set_item(ItemStatus::Failed, loaded_version, &item)
            })
            .await;
            if matches!(swapped, Ok(true)) {
                tracing::info!(item_id = %item.id, %date, "failed item requeued");
                report.requeued += 1;
            } else {
                self.state_machine.release(Some(date)).await;
                report.errors += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusinessDayPolicy, CapacityConfig, RetryConfig};
    use crate::core::calendar::BusinessCalendar;
    use crate::core::capacity::CapacityLedger;
    use crate::core::item::Priority;
    use crate::core::state_machine;
    use crate::infra::store::InMemoryStore;
    use crate::util::clock::ManualClock;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        ledger: Arc<CapacityLedger>,
        reconciler: Reconciler,
    }

    fn fixture(capacity: CapacityConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let ledger = Arc::new(CapacityLedger::new(
            store.clone(),
            &capacity,
            PersistenceConfig::default(),
        ));
        let calendar = Arc::new(BusinessCalendar::new(BusinessDayPolicy::default()).unwrap());
        let machine = Arc::new(QueueStateMachine::new(
            calendar,
            ledger.clone(),
            RetryConfig::default(),
            capacity.horizon_days,
        ));
        let reconciler = Reconciler::new(
            store.clone(),
            machine,
            clock.clone(),
            DispatchConfig {
                stale_processing_secs: 600,
                ..DispatchConfig::default()
            },
            PersistenceConfig::default(),
        );
        Fixture {
            store,
            clock,
            ledger,
            reconciler,
        }
    }

    #[tokio::test]
    async fn only_stale_items_are_failed() {
        let f = fixture(CapacityConfig::default());
        for (subject, claimed_at) in [
            ("lead-stale", start()),
            ("lead-fresh", start() + chrono::Duration::minutes(15)),
        ] {
            let mut item = QueueItem::new(subject, Priority::Medium, 3, start(), 0);
            state_machine::enqueue(&mut item, start(), start()).unwrap();
            state_machine::claim(&mut item, claimed_at).unwrap();
            f.store.insert_item(&item).await.unwrap();
        }
        f.clock.advance(chrono::Duration::minutes(20));

        let report = f.reconciler.sweep().await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.retried, 1);

        let items = f.store.items_snapshot();
        let stale = items.iter().find(|i| i.subject_id == "lead-stale").unwrap();
        assert_eq!(stale.status, ItemStatus::Queued);
        assert_eq!(stale.attempts, 1);
        let fresh = items.iter().find(|i| i.subject_id == "lead-fresh").unwrap();
        assert_eq!(fresh.status, ItemStatus::Processing);
    }

    #[tokio::test]
    async fn failed_item_is_requeued_once_capacity_frees_up() {
        let f = fixture(CapacityConfig {
            daily_limit: 1,
            horizon_days: 1,
            ..CapacityConfig::default()
        });
        let today = start().date_naive();
        f.ledger.reserve(today, 1).await.unwrap();

        let mut item = QueueItem::new("lead-waiting", Priority::Medium, 3, start(), 0);
        item.status = ItemStatus::Failed;
        item.attempts = 1;
        item.failed_at = Some(start());
        f.store.save_item(&item).await.unwrap();

        let report = f.reconciler.sweep().await.unwrap();
        assert_eq!(report.awaiting_capacity, 1);
        assert_eq!(f.store.items_snapshot()[0].status, ItemStatus::Failed);

        f.ledger.release(today, 1).await.unwrap();
        let report = f.reconciler.sweep().await.unwrap();
        assert_eq!(report.requeued, 1);
        let requeued = &f.store.items_snapshot()[0];
        assert_eq!(requeued.status, ItemStatus::Queued);
        assert_eq!(requeued.attempts, 1);
        assert_eq!(f.ledger.window(today).await.unwrap().committed, 1);

        let report = f.reconciler.sweep().await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }
}

//! Processing dispatcher: claims due items, sends them and records outcomes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DispatchConfig, PersistenceConfig};
use crate::core::item::{ItemStatus, QueueItem};
use crate::core::sender::{MessageSender, SendReceipt, SendRequest};
use crate::core::state_machine::{self, FailureDisposition, QueueStateMachine};
use crate::core::store::{ItemFilter, QueueStore};
use crate::core::{QueueError, SendError};
use crate::util::clock::Clock;
use crate::util::retry::call_store;

/// Counters for one dispatcher tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Items moved to `processing`.
    pub claimed: usize,
    /// Items sent successfully.
    pub completed: usize,
    /// Failed items re-queued for a later attempt.
    pub retried: usize,
    /// Failed items out of attempts.
    pub dead_lettered: usize,
    /// Failed items with attempts left but no capacity in the horizon.
    pub unschedulable: usize,
    /// Items another writer claimed or changed first.
    pub skipped: usize,
    /// Items whose outcome could not be persisted; left in `processing`.
    pub stranded: usize,
}

/// Pulls due items and feeds send outcomes back into the state machine.
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    sender: Arc<dyn MessageSender>,
    state_machine: Arc<QueueStateMachine>,
    clock: Arc<dyn Clock>,
    dispatch: DispatchConfig,
    persistence: PersistenceConfig,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn QueueStore>,
        sender: Arc<dyn MessageSender>,
        state_machine: Arc<QueueStateMachine>,
        clock: Arc<dyn Clock>,
        dispatch: DispatchConfig,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            store,
            sender,
            state_machine,
            clock,
            dispatch,
            persistence,
        }
    }

    /// Dispatcher settings.
    pub const fn config(&self) -> &DispatchConfig {
        &self.dispatch
    }

    /// Run one tick: up to `batch_size` due items, sent one after another.
    ///
    /// Fails only when the due set cannot be loaded. Per-item problems are
    /// logged and counted in the report.
    pub async fn tick(&self) -> Result<TickReport, QueueError> {
        let now = self.clock.now();
        let filter = ItemFilter::due(now, self.dispatch.batch_size);
        let mut due = call_store(&self.persistence, "load_items", || {
            self.store.load_items(&filter)
        })
        .await?;
        due.sort_by(QueueItem::dispatch_order);
        due.truncate(self.dispatch.batch_size);

        let mut report = TickReport::default();
        if due.is_empty() {
            tracing::debug!("no items due");
            return Ok(report);
        }

        let spacing = Duration::from_millis(self.dispatch.send_interval_ms);
        for (index, item) in due.into_iter().enumerate() {
            if index > 0 && !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }
            self.process(item, &mut report).await;
        }

        tracing::info!(
            claimed = report.claimed,
            completed = report.completed,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            skipped = report.skipped,
            stranded = report.stranded,
            "dispatch tick finished"
        );
        Ok(report)
    }

    /// Claim and send one item loaded at the start of the tick.
    ///
    /// The claim matches status and version, so a copy made stale by an
    /// overlapping tick (claimed, failed and re-queued since) loses the swap.
    async fn process(&self, item: QueueItem, report: &mut TickReport) {
        let loaded_version = item.version;
        let mut claimed = item;
        if let Err(e) = state_machine::claim(&mut claimed, self.clock.now()) {
            tracing::debug!(item_id = %claimed.id, error = %e, "item not claimable");
            report.skipped += 1;
            return;
        }
        match call_store(&self.persistence, "compare_and_set_item", || {
            self.store
                .compare_and_set_item(ItemStatus::Queued, loaded_version, &claimed)
        })
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(item_id = %claimed.id, "claim lost to another writer");
                report.skipped += 1;
                return;
            }
            Err(e) => {
                tracing::warn!(item_id = %claimed.id, error = %e, "claim failed");
                report.skipped += 1;
                return;
            }
        }
        report.claimed += 1;
        tracing::debug!(item_id = %claimed.id, subject_id = %claimed.subject_id, "item claimed");

        let result = self.send(&claimed).await;
        let now = self.clock.now();
        match result {
            Ok(receipt) => self.record_success(claimed, receipt, now, report).await,
            Err(err) => {
                tracing::warn!(item_id = %claimed.id, error = %err, "send failed");
                match record_failure(
                    &self.state_machine,
                    self.store.as_ref(),
                    &self.persistence,
                    claimed,
                    &err.to_string(),
                    now,
                )
                .await
                {
                    Ok(FailureDisposition::Retrying { .. }) => report.retried += 1,
                    Ok(FailureDisposition::DeadLettered) => report.dead_lettered += 1,
                    Ok(FailureDisposition::Unschedulable) => report.unschedulable += 1,
                    Err(_) => report.stranded += 1,
                }
            }
        }
    }

    /// Send on its own task so a hung provider call can be abandoned.
    async fn send(&self, item: &QueueItem) -> Result<SendReceipt, SendError> {
        let sender = Arc::clone(&self.sender);
        let request = SendRequest::for_item(item);
        let mut handle = tokio::spawn(async move { sender.send(request).await });
        match tokio::time::timeout(self.dispatch.send_timeout(), &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(SendError::Transport(format!("send task failed: {join}"))),
            Err(_) => {
                handle.abort();
                Err(SendError::Timeout)
            }
        }
    }

    async fn record_success(
        &self,
        mut item: QueueItem,
        receipt: SendReceipt,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let claimed_version = item.version;
        if let Err(e) = state_machine::complete(&mut item, now, receipt.provider_message_id) {
            tracing::error!(item_id = %item.id, error = %e, "cannot complete item");
            report.stranded += 1;
            return;
        }
        match call_store(&self.persistence, "compare_and_set_item", || {
            self.store
                .compare_and_set_item(ItemStatus::Processing, claimed_version, &item)
        })
        .await
        {
            Ok(true) => {
                tracing::info!(item_id = %item.id, subject_id = %item.subject_id, "item completed");
                report.completed += 1;
            }
            Ok(false) => {
                tracing::warn!(item_id = %item.id, "item changed while sending; completion dropped");
                report.stranded += 1;
            }
            Err(e) => {
                tracing::error!(item_id = %item.id, error = %e, "completion not persisted");
                report.stranded += 1;
            }
        }
    }
}

/// Apply a failed outcome to a `processing` item and persist it.
///
/// Returns an error when the outcome could not be written; the stored item
/// is then still `processing` and any new reservation has been returned.
pub(crate) async fn record_failure(
    machine: &QueueStateMachine,
    store: &dyn QueueStore,
    persistence: &PersistenceConfig,
    mut item: QueueItem,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<FailureDisposition, QueueError> {
    let previous = machine.reserved_date(&item);
    let claimed_version = item.version;
    let disposition = machine.fail_and_retry(&mut item, reason, now).await?;
    let persisted = call_store(persistence, "compare_and_set_item", || {
        store.compare_and_set_item(ItemStatus::Processing, claimed_version, &item)
    })
    .await;
    match persisted {
        Ok(true) => {
            machine.settle(previous, disposition, true).await;
            Ok(disposition)
        }
        Ok(false) => {
            machine.settle(previous, disposition, false).await;
            tracing::warn!(item_id = %item.id, "item changed concurrently; failure dropped");
            Err(QueueError::Persistence(format!(
                "item {} is no longer processing",
                item.id
            )))
        }
        Err(e) => {
            machine.settle(previous, disposition, false).await;
            tracing::error!(item_id = %item.id, error = %e, "failure outcome not persisted");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusinessDayPolicy, CapacityConfig, RetryConfig};
    use crate::core::calendar::BusinessCalendar;
    use crate::core::capacity::CapacityLedger;
    use crate::core::item::Priority;
    use crate::infra::store::InMemoryStore;
    use crate::util::clock::ManualClock;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSender {
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedSender {
        fn new(fail: bool, delay: Duration) -> Self {
            Self {
                fail,
                delay,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageSender for ScriptedSender {
        async fn send(&self, request: SendRequest) -> Result<SendReceipt, SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                Err(SendError::Transport("channel down".into()))
            } else {
                Ok(SendReceipt {
                    provider_message_id: Some(format!("msg-{}", request.subject_id)),
                })
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 10, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        ledger: Arc<CapacityLedger>,
        dispatcher: Dispatcher,
    }

    fn fixture(sender: Arc<ScriptedSender>, dispatch: DispatchConfig) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let capacity = CapacityConfig {
            daily_limit: 10,
            ..CapacityConfig::default()
        };
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
        let dispatcher = Dispatcher::new(
            store.clone(),
            sender,
            machine,
            Arc::new(ManualClock::new(now())),
            dispatch,
            PersistenceConfig::default(),
        );
        Fixture {
            store,
            ledger,
            dispatcher,
        }
    }

    async fn seed(f: &Fixture, subject: &str, priority: Priority) -> QueueItem {
        let mut item = QueueItem::new(subject, priority, 3, now(), 0);
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        assert_eq!(f.ledger.reserve(date, 1).await.unwrap(), 1);
        state_machine::enqueue(&mut item, now(), now()).unwrap();
        f.store.insert_item(&item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn successful_send_completes_item() {
        let sender = Arc::new(ScriptedSender::new(false, Duration::ZERO));
        let f = fixture(sender.clone(), DispatchConfig::default());
        seed(&f, "lead-1", Priority::Medium).await;

        let report = f.dispatcher.tick().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);
        let item = &f.store.items_snapshot()[0];
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.provider_message_id.as_deref(), Some("msg-lead-1"));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_send_is_requeued_and_capacity_moves() {
        let sender = Arc::new(ScriptedSender::new(true, Duration::ZERO));
        let f = fixture(sender, DispatchConfig::default());
        seed(&f, "lead-1", Priority::Medium).await;

        let report = f.dispatcher.tick().await.unwrap();
        assert_eq!(report.retried, 1);
        let item = &f.store.items_snapshot()[0];
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.attempts, 1);
        assert!(item.scheduled_for.unwrap() > now());
        // 15-minute backoff lands on the same day: still one unit held.
        let windows = f.store.windows_snapshot();
        assert_eq!(windows.iter().map(|w| w.committed).sum::<u32>(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_send_times_out_as_failure() {
        let sender = Arc::new(ScriptedSender::new(false, Duration::from_secs(120)));
        let f = fixture(
            sender,
            DispatchConfig {
                send_timeout_secs: 1,
                ..DispatchConfig::default()
            },
        );
        seed(&f, "lead-1", Priority::Medium).await;

        let report = f.dispatcher.tick().await.unwrap();
        assert_eq!(report.retried, 1);
        let item = &f.store.items_snapshot()[0];
        assert_eq!(item.last_error.as_deref(), Some("send timed out"));
    }

    #[tokio::test]
    async fn batch_size_caps_claims_in_priority_order() {
        let sender = Arc::new(ScriptedSender::new(false, Duration::ZERO));
        let f = fixture(
            sender,
            DispatchConfig {
                batch_size: 1,
                ..DispatchConfig::default()
            },
        );
        seed(&f, "lead-low", Priority::Low).await;
        seed(&f, "lead-urgent", Priority::Urgent).await;

        let report = f.dispatcher.tick().await.unwrap();
        assert_eq!(report.completed, 1);
        let done: Vec<_> = f
            .store
            .items_snapshot()
            .into_iter()
            .filter(|i| i.status == ItemStatus::Completed)
            .map(|i| i.subject_id)
            .collect();
        assert_eq!(done, vec!["lead-urgent".to_string()]);
    }

    #[tokio::test]
    async fn items_not_yet_due_are_left_alone() {
        let sender = Arc::new(ScriptedSender::new(false, Duration::ZERO));
        let f = fixture(sender.clone(), DispatchConfig::default());
        let mut item = QueueItem::new("lead-later", Priority::High, 3, now(), 0);
        state_machine::enqueue(&mut item, now() + chrono::Duration::hours(3), now()).unwrap();
        f.store.insert_item(&item).await.unwrap();

        let report = f.dispatcher.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overlapping_tick_with_stale_copy_cannot_resend() {
        let sender = Arc::new(ScriptedSender::new(true, Duration::ZERO));
        let f = fixture(sender.clone(), DispatchConfig::default());
        let stale = seed(&f, "lead-1", Priority::Medium).await;

        assert_eq!(f.dispatcher.tick().await.unwrap().retried, 1);
        let requeued = f.store.items_snapshot()[0].clone();
        assert_eq!(requeued.status, ItemStatus::Queued);
        assert!(requeued.scheduled_for.unwrap() > now());

        let mut report = TickReport::default();
        f.dispatcher.process(stale, &mut report).await;
        assert_eq!(report.claimed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.items_snapshot()[0], requeued);
    }
}

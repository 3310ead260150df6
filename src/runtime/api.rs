//! Operational surface of the queue.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::core::state_machine;
use crate::core::{
    BusinessCalendar, CapacityLedger, Dispatcher, DistributionEngine, DistributionOutcome,
    ItemFilter, ItemId, ItemStatus, MessageSender, MetricsMonitor, Priority, QueueError, QueueItem,
    QueueMetricsSnapshot, QueueStateMachine, QueueStore, ReconcileReport, Reconciler, Rejection,
    RejectionReason, SubjectId, TickReport,
};
use crate::runtime::processing_loop::ProcessingLoop;
use crate::runtime::tokio_spawner::{Spawn, TokioSpawner};
use crate::util::clock::Clock;
use crate::util::retry::call_store;

/// Reload-and-swap rounds before `cancel_item` gives up.
const CANCEL_ROUNDS: usize = 8;

/// A lead submitted for scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Lead reference.
    pub subject_id: SubjectId,
    /// Ordering priority.
    #[serde(default)]
    pub priority: Priority,
    /// Opaque caller data carried on the item.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Candidate {
    /// Candidate with default priority and no metadata.
    pub fn new(subject_id: impl Into<SubjectId>) -> Self {
        Self {
            subject_id: subject_id.into(),
            priority: Priority::default(),
            metadata: BTreeMap::new(),
        }
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Result of `prepare_queue`: both subsets, never an error for partial failure.
pub type PrepareQueueResponse = DistributionOutcome;

/// Queue service wiring every component over one store, sender and clock.
pub struct QueueService<S: Spawn = TokioSpawner> {
    config: QueueConfig,
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    calendar: Arc<BusinessCalendar>,
    ledger: Arc<CapacityLedger>,
    state_machine: Arc<QueueStateMachine>,
    engine: DistributionEngine,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<MetricsMonitor>,
    processing: Arc<ProcessingLoop<S>>,
}

impl<S: Spawn> QueueService<S> {
    /// Validate `config` and wire the service.
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn QueueStore>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn Clock>,
        spawner: S,
    ) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::Configuration)?;
        let calendar = Arc::new(BusinessCalendar::new(config.business_days.clone())?);
        let ledger = Arc::new(CapacityLedger::new(
            Arc::clone(&store),
            &config.capacity,
            config.persistence.clone(),
        ));
        let state_machine = Arc::new(QueueStateMachine::new(
            Arc::clone(&calendar),
            Arc::clone(&ledger),
            config.retry.clone(),
            config.capacity.horizon_days,
        ));
        let engine = DistributionEngine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            Arc::clone(&calendar),
            config.capacity.clone(),
            config.persistence.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            sender,
            Arc::clone(&state_machine),
            Arc::clone(&clock),
            config.dispatch.clone(),
            config.persistence.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&state_machine),
            Arc::clone(&clock),
            config.dispatch.clone(),
            config.persistence.clone(),
        ));
        let metrics = Arc::new(MetricsMonitor::new(
            Arc::clone(&store),
            Arc::clone(&calendar),
            Arc::clone(&clock),
            config.capacity.daily_limit,
            config.metrics.clone(),
            config.persistence.clone(),
        ));
        let processing = Arc::new(ProcessingLoop::new(
            Arc::clone(&dispatcher),
            Arc::clone(&reconciler),
            Arc::clone(&metrics),
            spawner,
            config.dispatch.tick_interval(),
            config.dispatch.reconcile_every_ticks,
        ));
        tracing::info!(
            daily_limit = config.capacity.daily_limit,
            weekly_limit = ?config.capacity.weekly_limit,
            horizon_days = config.capacity.horizon_days,
            overflow = ?config.capacity.overflow,
            "queue service ready"
        );
        Ok(Self {
            config,
            store,
            clock,
            calendar,
            ledger,
            state_machine,
            engine,
            dispatcher,
            reconciler,
            metrics,
            processing,
        })
    }

    /// Configuration in effect.
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Shared capacity ledger.
    pub fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    /// Shared business calendar.
    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    /// Drop duplicate subjects within a batch, keeping the first occurrence.
    fn dedupe(candidates: Vec<Candidate>) -> (Vec<Candidate>, Vec<Rejection>) {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        for candidate in candidates {
            if seen.insert(candidate.subject_id.clone()) {
                unique.push(candidate);
            } else {
                rejected.push(Rejection {
                    subject_id: candidate.subject_id,
                    item_id: None,
                    reason: RejectionReason::AlreadyQueued,
                    detail: Some("duplicate subject in batch".into()),
                });
            }
        }
        (unique, rejected)
    }

    fn items_for(&self, candidates: Vec<Candidate>) -> Vec<QueueItem> {
        let now = self.clock.now();
        candidates
            .into_iter()
            .enumerate()
            .map(|(sequence, c)| {
                QueueItem::new(
                    c.subject_id,
                    c.priority,
                    self.config.retry.max_attempts,
                    now,
                    sequence as u64,
                )
                .with_metadata(c.metadata)
            })
            .collect()
    }

    /// Create items for `candidates` and place them on business days.
    ///
    /// Returns both the scheduled and the rejected subsets. Fails only on a
    /// configuration problem that makes scheduling impossible.
    pub async fn prepare_queue(
        &self,
        candidates: Vec<Candidate>,
    ) -> Result<PrepareQueueResponse, QueueError> {
        let submitted = candidates.len();
        let (unique, mut rejected) = Self::dedupe(candidates);

        let filter = ItemFilter::active_for(unique.iter().map(|c| c.subject_id.clone()));
        let active = if unique.is_empty() {
            Ok(Vec::new())
        } else {
            call_store(&self.config.persistence, "load_items", || {
                self.store.load_items(&filter)
            })
            .await
        };
        let active: HashSet<SubjectId> = match active {
            Ok(items) => items.into_iter().map(|i| i.subject_id).collect(),
            Err(e) => {
                tracing::error!(error = %e, "cannot check active subjects");
                rejected.extend(unique.into_iter().map(|c| Rejection {
                    subject_id: c.subject_id,
                    item_id: None,
                    reason: RejectionReason::PersistenceFailure,
                    detail: Some(e.to_string()),
                }));
                return Ok(DistributionOutcome {
                    scheduled: Vec::new(),
                    rejected,
                });
            }
        };

        let (fresh, queued): (Vec<_>, Vec<_>) = unique
            .into_iter()
            .partition(|c| !active.contains(&c.subject_id));
        rejected.extend(queued.into_iter().map(|c| Rejection {
            subject_id: c.subject_id,
            item_id: None,
            reason: RejectionReason::AlreadyQueued,
            detail: Some("subject already has an active item".into()),
        }));

        let mut outcome = self
            .engine
            .distribute(self.items_for(fresh), self.clock.now())
            .await?;
        rejected.append(&mut outcome.rejected);
        outcome.rejected = rejected;
        self.metrics.invalidate();

        tracing::info!(
            submitted,
            scheduled = outcome.scheduled.len(),
            rejected = outcome.rejected.len(),
            "prepare_queue finished"
        );
        Ok(outcome)
    }

    /// Plan `candidates` against current capacity without persisting anything.
    pub async fn preview_queue(
        &self,
        candidates: Vec<Candidate>,
    ) -> Result<DistributionOutcome, QueueError> {
        let (unique, mut rejected) = Self::dedupe(candidates);
        let now = self.clock.now();
        let start = self
            .calendar
            .local_date(self.calendar.next_working_instant(now)?);
        let end = self
            .calendar
            .working_days_from(start)
            .take(self.engine.horizon_days() as usize)
            .last()
            .unwrap_or(start);
        let mut snapshot = self.ledger.snapshot(start, end).await?;
        let mut outcome = self
            .engine
            .dry_run(self.items_for(unique), &mut snapshot, now)?;
        rejected.append(&mut outcome.rejected);
        outcome.rejected = rejected;
        Ok(outcome)
    }

    /// Start the recurring dispatcher. Returns `false` if already running.
    pub fn start_processing(&self) -> bool {
        self.processing.start()
    }

    /// Pause the dispatcher after its current tick. Returns `false` if already paused.
    pub fn pause_processing(&self) -> bool {
        self.processing.pause()
    }

    /// Whether the dispatcher loop is running.
    pub fn is_processing(&self) -> bool {
        self.processing.is_running()
    }

    /// Current metrics; `critical` rather than an error when the store is down.
    pub async fn get_metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot().await
    }

    /// Drop cached metrics.
    pub fn invalidate_metrics(&self) {
        self.metrics.invalidate();
    }

    /// Cancel a `pending` or `queued` item and return its capacity.
    ///
    /// The write matches the loaded status and version, so a dispatcher that
    /// claimed or re-queued the item in between forces a reload. Loses to a
    /// claim that is still in flight.
    pub async fn cancel_item(&self, id: ItemId) -> Result<QueueItem, QueueError> {
        let filter = ItemFilter::by_id(id);
        for _ in 0..CANCEL_ROUNDS {
            let mut item = call_store(&self.config.persistence, "load_items", || {
                self.store.load_items(&filter)
            })
            .await?
            .into_iter()
            .next()
            .ok_or(QueueError::NotFound(id))?;

            let (expected, loaded_version) = (item.status, item.version);
            let reserved = match expected {
                ItemStatus::Queued => self.state_machine.reserved_date(&item),
                _ => None,
            };
            state_machine::cancel(&mut item, self.clock.now())?;
            let swapped = call_store(&self.config.persistence, "compare_and_set_item", || {
                self.store
                    .compare_and_set_item(expected, loaded_version, &item)
            })
            .await?;
            if !swapped {
                tracing::debug!(item_id = %id, "item changed while cancelling, reloading");
                continue;
            }

            self.state_machine.release(reserved).await;
            self.metrics.invalidate();
            tracing::info!(item_id = %id, subject_id = %item.subject_id, "item cancelled");
            return Ok(item);
        }
        Err(QueueError::Persistence(format!(
            "item {id} kept changing while cancelling"
        )))
    }

    /// Retry or dead-letter items stuck in `processing` and re-queue
    /// `failed` items that still have attempts left.
    pub async fn reconcile_stale(&self) -> Result<ReconcileReport, QueueError> {
        let report = self.reconciler.sweep().await?;
        if report.examined > 0 || report.requeued > 0 {
            self.metrics.invalidate();
        }
        Ok(report)
    }

    /// Run one dispatcher tick immediately, independent of the loop.
    pub async fn tick_now(&self) -> Result<TickReport, QueueError> {
        let report = self.dispatcher.tick().await?;
        self.metrics.invalidate();
        Ok(report)
    }
}

impl<S: Spawn> Drop for QueueService<S> {
    fn drop(&mut self) {
        self.processing.pause();
    }
}

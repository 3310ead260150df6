//! Queue metrics and discrete health.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{MetricsConfig, PersistenceConfig};
use crate::core::calendar::BusinessCalendar;
use crate::core::item::{ItemStatus, QueueItem};
use crate::core::store::{ItemFilter, QueueStore};
use crate::util::clock::Clock;
use crate::util::retry::call_store;

/// Success rate below which the queue is critical.
pub const CRITICAL_SUCCESS_RATE: f64 = 0.5;
/// Success rate below which the queue is degraded.
pub const DEGRADED_SUCCESS_RATE: f64 = 0.85;
/// Backlog, in multiples of the daily limit, above which the queue is degraded.
pub const BACKLOG_FACTOR: u64 = 2;

/// Discrete queue health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealth {
    /// Within thresholds.
    Healthy,
    /// Backlog or failure rate elevated.
    Degraded,
    /// Data source unreachable or most sends failing.
    Critical,
}

/// Item count per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// `pending` items.
    pub pending: usize,
    /// `queued` items.
    pub queued: usize,
    /// `processing` items.
    pub processing: usize,
    /// `completed` items.
    pub completed: usize,
    /// `failed` items, retrying or not.
    pub failed: usize,
    /// `cancelled` items.
    pub cancelled: usize,
}

impl StatusCounts {
    fn add(&mut self, status: ItemStatus) {
        let slot = match status {
            ItemStatus::Pending => &mut self.pending,
            ItemStatus::Queued => &mut self.queued,
            ItemStatus::Processing => &mut self.processing,
            ItemStatus::Completed => &mut self.completed,
            ItemStatus::Failed => &mut self.failed,
            ItemStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }
}

/// Point-in-time queue metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    /// `pending` + `queued` items.
    pub queue_depth: usize,
    /// Items currently `processing`.
    pub actively_processing: usize,
    /// `failed` items with attempts left, waiting for retry capacity.
    pub awaiting_retry: usize,
    /// Items completed on the current business day.
    pub processed_today: usize,
    /// completed / (completed + hard-failed) over the trailing window; 1.0 when nothing finished.
    pub success_rate: f64,
    /// Completions counted in the rate.
    pub completed_in_window: usize,
    /// Hard failures counted in the rate.
    pub hard_failed_in_window: usize,
    /// Per-status breakdown.
    pub status_counts: StatusCounts,
    /// Discrete health.
    pub queue_health: QueueHealth,
    /// False when the store could not be read.
    pub source_available: bool,
    /// When the snapshot was computed.
    pub generated_at: DateTime<Utc>,
}

impl QueueMetricsSnapshot {
    /// Snapshot reported when the store is unreachable.
    pub fn unavailable(now: DateTime<Utc>) -> Self {
        Self {
            queue_depth: 0,
            actively_processing: 0,
            awaiting_retry: 0,
            processed_today: 0,
            success_rate: 0.0,
            completed_in_window: 0,
            hard_failed_in_window: 0,
            status_counts: StatusCounts::default(),
            queue_health: QueueHealth::Critical,
            source_available: false,
            generated_at: now,
        }
    }
}

/// Map depth, stranded retries and success rate onto a health level.
pub fn classify_health(
    queue_depth: usize,
    awaiting_retry: usize,
    success_rate: f64,
    daily_limit: u32,
) -> QueueHealth {
    if success_rate < CRITICAL_SUCCESS_RATE {
        return QueueHealth::Critical;
    }
    let backlog_limit = BACKLOG_FACTOR * u64::from(daily_limit);
    if queue_depth as u64 > backlog_limit
        || awaiting_retry > 0
        || success_rate < DEGRADED_SUCCESS_RATE
    {
        return QueueHealth::Degraded;
    }
    QueueHealth::Healthy
}

/// Compute metrics from a full item listing.
pub fn compute_snapshot(
    items: &[QueueItem],
    calendar: &BusinessCalendar,
    daily_limit: u32,
    window_days: u32,
    now: DateTime<Utc>,
) -> QueueMetricsSnapshot {
    let today = calendar.local_date(now);
    let window_start = now
        .checked_sub_signed(chrono::Duration::days(i64::from(window_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let in_window = |at: Option<DateTime<Utc>>| at.is_some_and(|t| t >= window_start && t <= now);

    let mut counts = StatusCounts::default();
    let mut processed_today = 0;
    let mut completed = 0;
    let mut hard_failed = 0;
    let mut awaiting_retry = 0;
    for item in items {
        counts.add(item.status);
        match item.status {
            ItemStatus::Completed => {
                if in_window(item.completed_at) {
                    completed += 1;
                }
                if item.completed_at.is_some_and(|t| calendar.local_date(t) == today) {
                    processed_today += 1;
                }
            }
            ItemStatus::Failed if !item.is_hard_failure() => awaiting_retry += 1,
            ItemStatus::Failed if in_window(item.failed_at) => hard_failed += 1,
            _ => {}
        }
    }

    let finished = completed + hard_failed;
    #[allow(clippy::cast_precision_loss)]
    let success_rate = if finished == 0 {
        1.0
    } else {
        completed as f64 / finished as f64
    };
    let queue_depth = counts.pending + counts.queued;

    QueueMetricsSnapshot {
        queue_depth,
        actively_processing: counts.processing,
        awaiting_retry,
        processed_today,
        success_rate,
        completed_in_window: completed,
        hard_failed_in_window: hard_failed,
        status_counts: counts,
        queue_health: classify_health(queue_depth, awaiting_retry, success_rate, daily_limit),
        source_available: true,
        generated_at: now,
    }
}

/// Computes snapshots and serves them from an instance-owned cache.
pub struct MetricsMonitor {
    store: Arc<dyn QueueStore>,
    calendar: Arc<BusinessCalendar>,
    clock: Arc<dyn Clock>,
    daily_limit: u32,
    config: MetricsConfig,
    persistence: PersistenceConfig,
    cache: Mutex<Option<QueueMetricsSnapshot>>,
}

impl MetricsMonitor {
    /// Create a monitor with an empty cache.
    pub fn new(
        store: Arc<dyn QueueStore>,
        calendar: Arc<BusinessCalendar>,
        clock: Arc<dyn Clock>,
        daily_limit: u32,
        config: MetricsConfig,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            store,
            calendar,
            clock,
            daily_limit,
            config,
            persistence,
            cache: Mutex::new(None),
        }
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        self.cache.lock().take();
    }

    /// Current metrics. Never fails: an unreachable store yields a
    /// `critical` snapshot, which is not cached.
    pub async fn snapshot(&self) -> QueueMetricsSnapshot {
        let now = self.clock.now();
        let ttl = i64::try_from(self.config.cache_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(chrono::Duration::zero);
        if let Some(cached) = self.cache.lock().as_ref() {
            if now >= cached.generated_at && now - cached.generated_at < ttl {
                return cached.clone();
            }
        }

        let filter = ItemFilter::all();
        let items = match call_store(&self.persistence, "load_items", || {
            self.store.load_items(&filter)
        })
        .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "metrics source unavailable");
                return QueueMetricsSnapshot::unavailable(now);
            }
        };

        let snapshot = compute_snapshot(
            &items,
            &self.calendar,
            self.daily_limit,
            self.config.success_window_days,
            now,
        );
        if snapshot.queue_health != QueueHealth::Healthy {
            tracing::warn!(
                health = ?snapshot.queue_health,
                queue_depth = snapshot.queue_depth,
                awaiting_retry = snapshot.awaiting_retry,
                success_rate = snapshot.success_rate,
                "queue health below healthy"
            );
        }
        *self.cache.lock() = Some(snapshot.clone());
        snapshot
    }
}

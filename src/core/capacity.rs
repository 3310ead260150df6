//! Capacity ledger: per-date committed load against daily and weekly limits.
//!
//! `reserve` is the shared hotspot between concurrent distribution runs and
//! retries. It never locks; like an atomic CAS loop it reads the persisted
//! window, computes a grant and commits it with a compare-and-set on the
//! `committed` value, retrying when another writer got there first. A losing
//! racer sees the new `committed` and receives a smaller grant, never an
//! over-commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::config::{CapacityConfig, PersistenceConfig};
use crate::core::store::{CapacityWindow, QueueStore};
use crate::core::QueueError;
use crate::util::retry::call_store;

/// Compare-and-set rounds before a reservation is reported as failed.
const MAX_CAS_ROUNDS: usize = 64;

/// Ledger over persisted capacity windows.
pub struct CapacityLedger {
    store: Arc<dyn QueueStore>,
    daily_limit: u32,
    weekly_limit: Option<u32>,
    persistence: PersistenceConfig,
}

impl CapacityLedger {
    /// Create a ledger using the configured limits.
    pub fn new(
        store: Arc<dyn QueueStore>,
        capacity: &CapacityConfig,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            store,
            daily_limit: capacity.daily_limit,
            weekly_limit: capacity.weekly_limit,
            persistence,
        }
    }

    /// Limit applied to dates without a persisted window.
    pub const fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Current window for `date`, or an empty one at the daily limit.
    pub async fn window(&self, date: NaiveDate) -> Result<CapacityWindow, QueueError> {
        let windows = call_store(&self.persistence, "load_capacity", || {
            self.store.load_capacity(date, date)
        })
        .await?;
        Ok(windows
            .into_iter()
            .find(|w| w.date == date)
            .unwrap_or_else(|| CapacityWindow::empty(date, self.daily_limit)))
    }

    /// Windows for every date in `start..=end`, persisted or default.
    ///
    /// With a weekly limit the load widens to whole ISO weeks, so the
    /// snapshot sees what earlier and later days of those weeks committed.
    pub async fn snapshot(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CapacitySnapshot, QueueError> {
        let (start, end) = if self.weekly_limit.is_some() {
            (iso_week_bounds(start).0, iso_week_bounds(end).1)
        } else {
            (start, end)
        };
        let windows = call_store(&self.persistence, "load_capacity", || {
            self.store.load_capacity(start, end)
        })
        .await?;
        Ok(CapacitySnapshot::new(self.daily_limit, self.weekly_limit, windows))
    }

    /// Remaining weekly capacity for the ISO week containing `date`.
    async fn weekly_remaining(&self, date: NaiveDate) -> Result<Option<u32>, QueueError> {
        let Some(limit) = self.weekly_limit else {
            return Ok(None);
        };
        let (monday, sunday) = iso_week_bounds(date);
        let windows = call_store(&self.persistence, "load_capacity", || {
            self.store.load_capacity(monday, sunday)
        })
        .await?;
        let committed: u32 = windows.iter().map(|w| w.committed).sum();
        Ok(Some(limit.saturating_sub(committed)))
    }

    /// `limit - committed` for `date`, floored at zero and capped by the weekly limit.
    pub async fn remaining_capacity(&self, date: NaiveDate) -> Result<u32, QueueError> {
        let window = self.window(date).await?;
        let remaining = window.remaining();
        Ok(match self.weekly_remaining(date).await? {
            Some(weekly) => remaining.min(weekly),
            None => remaining,
        })
    }

    /// Commit up to `count` units to `date`; returns how many were granted.
    pub async fn reserve(&self, date: NaiveDate, count: u32) -> Result<u32, QueueError> {
        if count == 0 {
            return Ok(0);
        }
        for round in 0..MAX_CAS_ROUNDS {
            let window = self.window(date).await?;
            let mut grant = count.min(window.remaining());
            if let Some(weekly) = self.weekly_remaining(date).await? {
                grant = grant.min(weekly);
            }
            if grant == 0 {
                tracing::debug!(%date, requested = count, "no capacity left");
                return Ok(0);
            }

            let updated = CapacityWindow {
                committed: window.committed + grant,
                ..window
            };
            let swapped = call_store(&self.persistence, "compare_and_set_capacity", || {
                self.store.compare_and_set_capacity(window.committed, &updated)
            })
            .await?;
            if swapped {
                tracing::debug!(
                    %date,
                    requested = count,
                    granted = grant,
                    committed = updated.committed,
                    limit = updated.limit,
                    "capacity reserved"
                );
                return Ok(grant);
            }
            tracing::debug!(%date, round, "capacity reservation contended, retrying");
        }
        tracing::warn!(%date, "capacity reservation gave up after contention");
        Err(QueueError::Persistence(format!(
            "capacity reservation for {date} kept losing to concurrent writers"
        )))
    }

    /// Return `count` units to `date`.
    pub async fn release(&self, date: NaiveDate, count: u32) -> Result<(), QueueError> {
        if count == 0 {
            return Ok(());
        }
        for _ in 0..MAX_CAS_ROUNDS {
            let window = self.window(date).await?;
            if window.committed == 0 {
                tracing::warn!(%date, count, "release on empty window ignored");
                return Ok(());
            }
            let updated = CapacityWindow {
                committed: window.committed.saturating_sub(count),
                ..window
            };
            let swapped = call_store(&self.persistence, "compare_and_set_capacity", || {
                self.store.compare_and_set_capacity(window.committed, &updated)
            })
            .await?;
            if swapped {
                tracing::debug!(%date, released = count, committed = updated.committed, "capacity released");
                return Ok(());
            }
        }
        Err(QueueError::Persistence(format!(
            "capacity release for {date} kept losing to concurrent writers"
        )))
    }
}

/// Monday and Sunday of the ISO week containing `date`.
fn iso_week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let week = date.iso_week();
    let monday = NaiveDate::from_isoywd_opt(week.year(), week.week(), Weekday::Mon).unwrap_or(date);
    let sunday = monday.checked_add_days(Days::new(6)).unwrap_or(monday);
    (monday, sunday)
}

/// Point-in-time copy of capacity used for dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacitySnapshot {
    daily_limit: u32,
    weekly_limit: Option<u32>,
    windows: BTreeMap<NaiveDate, CapacityWindow>,
}

impl CapacitySnapshot {
    /// Build a snapshot from persisted windows.
    pub fn new(
        daily_limit: u32,
        weekly_limit: Option<u32>,
        windows: impl IntoIterator<Item = CapacityWindow>,
    ) -> Self {
        Self {
            daily_limit,
            weekly_limit,
            windows: windows.into_iter().map(|w| (w.date, w)).collect(),
        }
    }

    /// Window for `date`, defaulting to empty.
    pub fn window(&self, date: NaiveDate) -> CapacityWindow {
        self.windows
            .get(&date)
            .copied()
            .unwrap_or_else(|| CapacityWindow::empty(date, self.daily_limit))
    }

    /// Remaining capacity for `date` including the weekly cap.
    pub fn remaining(&self, date: NaiveDate) -> u32 {
        let daily = self.window(date).remaining();
        match self.weekly_limit {
            Some(limit) => {
                let (monday, sunday) = iso_week_bounds(date);
                let committed: u32 = self
                    .windows
                    .range(monday..=sunday)
                    .map(|(_, w)| w.committed)
                    .sum();
                daily.min(limit.saturating_sub(committed))
            }
            None => daily,
        }
    }

    /// Same as the ledger's `reserve`, applied to the in-memory copy.
    pub fn reserve(&mut self, date: NaiveDate, count: u32) -> u32 {
        let grant = count.min(self.remaining(date));
        if grant > 0 {
            let mut window = self.window(date);
            window.committed += grant;
            self.windows.insert(date, window);
        }
        grant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::store::InMemoryStore;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn ledger(store: Arc<InMemoryStore>, daily: u32, weekly: Option<u32>) -> CapacityLedger {
        CapacityLedger::new(
            store,
            &CapacityConfig {
                daily_limit: daily,
                weekly_limit: weekly,
                ..CapacityConfig::default()
            },
            PersistenceConfig::default(),
        )
    }

    #[tokio::test]
    async fn reserve_grants_up_to_limit() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = ledger(store, 10, None);
        assert_eq!(ledger.reserve(date(15), 6).await.unwrap(), 6);
        assert_eq!(ledger.reserve(date(15), 6).await.unwrap(), 4);
        assert_eq!(ledger.reserve(date(15), 1).await.unwrap(), 0);
        assert_eq!(ledger.remaining_capacity(date(15)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_returns_capacity() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = ledger(store, 10, None);
        ledger.reserve(date(15), 10).await.unwrap();
        ledger.release(date(15), 3).await.unwrap();
        assert_eq!(ledger.remaining_capacity(date(15)).await.unwrap(), 3);
        ledger.release(date(15), 50).await.unwrap();
        assert_eq!(ledger.window(date(15)).await.unwrap().committed, 0);
    }

    #[tokio::test]
    async fn weekly_limit_caps_grants() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = ledger(store, 10, Some(15));
        assert_eq!(ledger.reserve(date(12), 10).await.unwrap(), 10);
        assert_eq!(ledger.reserve(date(13), 10).await.unwrap(), 5);
        // Next ISO week starts fresh.
        assert_eq!(ledger.reserve(date(19), 10).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn snapshot_counts_the_whole_week_against_the_weekly_limit() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = ledger(store, 10, Some(15));
        assert_eq!(ledger.reserve(date(13), 10).await.unwrap(), 10);

        let snapshot = ledger.snapshot(date(15), date(16)).await.unwrap();
        assert_eq!(
            snapshot.remaining(date(15)),
            ledger.remaining_capacity(date(15)).await.unwrap()
        );
        assert_eq!(snapshot.remaining(date(15)), 5);
    }

    #[tokio::test]
    async fn overcommitted_window_reports_zero() {
        let store = Arc::new(InMemoryStore::new());
        store
            .save_capacity(&CapacityWindow {
                date: date(15),
                limit: 5,
                committed: 8,
            })
            .await
            .unwrap();
        let ledger = ledger(store, 5, None);
        assert_eq!(ledger.remaining_capacity(date(15)).await.unwrap(), 0);
        assert_eq!(ledger.reserve(date(15), 3).await.unwrap(), 0);
    }

    #[test]
    fn snapshot_reserve_matches_ledger_rules() {
        let mut snapshot = CapacitySnapshot::new(
            4,
            None,
            [CapacityWindow {
                date: date(15),
                limit: 4,
                committed: 3,
            }],
        );
        assert_eq!(snapshot.reserve(date(15), 5), 1);
        assert_eq!(snapshot.reserve(date(16), 5), 4);
        assert_eq!(snapshot.remaining(date(16)), 0);
    }
}

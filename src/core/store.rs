//! Persistence boundary for queue items and capacity windows.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::item::{ItemId, ItemStatus, QueueItem, SubjectId};
use crate::core::StoreError;

/// One calendar day's committed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityWindow {
    /// Business date.
    pub date: NaiveDate,
    /// Items allowed on this date.
    pub limit: u32,
    /// Items currently committed to this date.
    pub committed: u32,
}

impl CapacityWindow {
    /// Empty window with the given limit.
    pub const fn empty(date: NaiveDate, limit: u32) -> Self {
        Self {
            date,
            limit,
            committed: 0,
        }
    }

    /// `limit - committed`, floored at zero.
    pub const fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.committed)
    }

    /// Whether external writes pushed the window past its limit.
    pub const fn is_overcommitted(&self) -> bool {
        self.committed > self.limit
    }
}

/// Selection criteria for [`QueueStore::load_items`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    /// Only these items (all when empty).
    pub item_ids: Vec<ItemId>,
    /// Only items in one of these statuses (all when empty).
    pub statuses: Vec<ItemStatus>,
    /// Only items for these subjects (all when empty).
    pub subject_ids: Vec<SubjectId>,
    /// Only items with `scheduled_for <= due_before`.
    pub due_before: Option<DateTime<Utc>>,
    /// Maximum items returned, in dispatch order.
    pub limit: Option<usize>,
}

impl ItemFilter {
    /// Every item.
    pub fn all() -> Self {
        Self::default()
    }

    /// Items in the given statuses.
    pub fn with_statuses(statuses: impl IntoIterator<Item = ItemStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A single item by id.
    pub fn by_id(id: ItemId) -> Self {
        Self {
            item_ids: vec![id],
            ..Self::default()
        }
    }

    /// Active items for any of `subjects`.
    pub fn active_for(subjects: impl IntoIterator<Item = SubjectId>) -> Self {
        Self {
            statuses: ItemStatus::ACTIVE.to_vec(),
            subject_ids: subjects.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Queued items due at `now`, capped at `limit`.
    pub fn due(now: DateTime<Utc>, limit: usize) -> Self {
        Self {
            statuses: vec![ItemStatus::Queued],
            due_before: Some(now),
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Whether an item satisfies every criterion except `limit`.
    pub fn matches(&self, item: &QueueItem) -> bool {
        if !self.item_ids.is_empty() && !self.item_ids.contains(&item.id) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&item.status) {
            return false;
        }
        if !self.subject_ids.is_empty() && !self.subject_ids.contains(&item.subject_id) {
            return false;
        }
        match (self.due_before, item.scheduled_for) {
            (Some(due), Some(at)) => at <= due,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Abstraction for persistence backends.
///
/// Every call may fail; writes are keyed by item id or date so retrying them
/// is safe. "No data" is an empty `Ok`, never an error.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    /// Load items matching the filter, in dispatch order.
    async fn load_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>, StoreError>;

    /// Insert a new item. Fails with [`StoreError::Conflict`] when the subject
    /// already has an active item.
    async fn insert_item(&self, item: &QueueItem) -> Result<(), StoreError>;

    /// Upsert an item by id.
    async fn save_item(&self, item: &QueueItem) -> Result<(), StoreError>;

    /// Replace the stored item only if its status is still `expected` and its
    /// version is still `expected_version`. Returns `false` when another
    /// writer changed it first.
    async fn compare_and_set_item(
        &self,
        expected: ItemStatus,
        expected_version: u64,
        item: &QueueItem,
    ) -> Result<bool, StoreError>;

    /// Load persisted windows with `start <= date <= end`.
    async fn load_capacity(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CapacityWindow>, StoreError>;

    /// Upsert a window by date.
    async fn save_capacity(&self, window: &CapacityWindow) -> Result<(), StoreError>;

    /// Replace a window only if its persisted `committed` still equals
    /// `expected_committed` (a missing window counts as zero).
    async fn compare_and_set_capacity(
        &self,
        expected_committed: u32,
        window: &CapacityWindow,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::Priority;

    #[test]
    fn due_filter_requires_schedule() {
        let now = Utc::now();
        let mut item = QueueItem::new("lead-1", Priority::Medium, 3, now, 0);
        item.status = ItemStatus::Queued;
        let filter = ItemFilter::due(now, 10);
        assert!(!filter.matches(&item));
        item.scheduled_for = Some(now);
        assert!(filter.matches(&item));
        item.scheduled_for = Some(now + chrono::Duration::seconds(1));
        assert!(!filter.matches(&item));
    }

    #[test]
    fn active_filter_ignores_finished_items() {
        let mut item = QueueItem::new("lead-1", Priority::Medium, 3, Utc::now(), 0);
        let filter = ItemFilter::active_for(["lead-1".to_string()]);
        assert!(filter.matches(&item));
        item.status = ItemStatus::Completed;
        assert!(!filter.matches(&item));
        assert!(ItemFilter::by_id(item.id).matches(&item));
    }

    #[test]
    fn window_remaining_floors_at_zero() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let window = CapacityWindow {
            date,
            limit: 10,
            committed: 12,
        };
        assert_eq!(window.remaining(), 0);
        assert!(window.is_overcommitted());
    }
}

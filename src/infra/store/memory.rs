//! In-memory queue store for development and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::core::item::{ItemId, ItemStatus, QueueItem};
use crate::core::store::{CapacityWindow, ItemFilter, QueueStore};
use crate::core::StoreError;

#[derive(Default)]
struct State {
    items: HashMap<ItemId, QueueItem>,
    windows: BTreeMap<NaiveDate, CapacityWindow>,
}

/// Process-local store guarded by a single mutex.
///
/// [`set_available`](Self::set_available) simulates an outage: every call
/// then fails with [`StoreError::Unavailable`].
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// All items, in dispatch order.
    pub fn items_snapshot(&self) -> Vec<QueueItem> {
        let mut items: Vec<_> = self.state.lock().items.values().cloned().collect();
        items.sort_by(QueueItem::dispatch_order);
        items
    }

    /// All persisted windows, in date order.
    pub fn windows_snapshot(&self) -> Vec<CapacityWindow> {
        self.state.lock().windows.values().copied().collect()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("in-memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn load_items(&self, filter: &ItemFilter) -> Result<Vec<QueueItem>, StoreError> {
        self.check()?;
        let mut items: Vec<_> = self
            .state
            .lock()
            .items
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        items.sort_by(QueueItem::dispatch_order);
        if let Some(limit) = filter.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn insert_item(&self, item: &QueueItem) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        if state.items.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!("item {} exists", item.id)));
        }
        let duplicate = state
            .items
            .values()
            .any(|i| i.subject_id == item.subject_id && i.status.is_active());
        if duplicate {
            return Err(StoreError::Conflict(item.subject_id.clone()));
        }
        state.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn save_item(&self, item: &QueueItem) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().items.insert(item.id, item.clone());
        Ok(())
    }

    async fn compare_and_set_item(
        &self,
        expected: ItemStatus,
        expected_version: u64,
        item: &QueueItem,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let Some(current) = state.items.get_mut(&item.id) else {
            return Err(StoreError::NotFound(item.id.to_string()));
        };
        if current.status != expected || current.version != expected_version {
            return Ok(false);
        }
        *current = item.clone();
        Ok(true)
    }

    async fn load_capacity(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CapacityWindow>, StoreError> {
        self.check()?;
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .state
            .lock()
            .windows
            .range(start..=end)
            .map(|(_, w)| *w)
            .collect())
    }

    async fn save_capacity(&self, window: &CapacityWindow) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().windows.insert(window.date, *window);
        Ok(())
    }

    async fn compare_and_set_capacity(
        &self,
        expected_committed: u32,
        window: &CapacityWindow,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let current = state.windows.get(&window.date).map_or(0, |w| w.committed);
        if current != expected_committed {
            return Ok(false);
        }
        state.windows.insert(window.date, *window);
        Ok(true)
    }
}

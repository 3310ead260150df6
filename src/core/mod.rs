//! Scheduling core: calendar, capacity, distribution, state machine,
//! dispatch and metrics.

pub mod calendar;
pub mod capacity;
pub mod dispatcher;
pub mod distribution;
pub mod error;
pub mod item;
pub mod metrics;
pub mod reconcile;
pub mod sender;
pub mod state_machine;
pub mod store;

pub use calendar::{BusinessCalendar, WorkingDays};
pub use capacity::{CapacityLedger, CapacitySnapshot};
pub use dispatcher::{Dispatcher, TickReport};
pub use distribution::{
    Assignment, DistributionEngine, DistributionOutcome, Rejection, RejectionReason,
};
pub use error::{AppResult, QueueError, SendError, StoreError};
pub use item::{ItemId, ItemStatus, Priority, QueueItem, SubjectId};
pub use metrics::{
    classify_health, compute_snapshot, MetricsMonitor, QueueHealth, QueueMetricsSnapshot,
    StatusCounts,
};
pub use reconcile::{ReconcileReport, Reconciler};
pub use sender::{MessageSender, SendReceipt, SendRequest};
pub use state_machine::{FailureDisposition, QueueStateMachine};
pub use store::{CapacityWindow, ItemFilter, QueueStore};

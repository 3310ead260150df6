//! Configuration models for the queue, calendar and dispatcher.

pub mod queue;

pub use queue::{
    BusinessDayPolicy, CapacityConfig, DispatchConfig, MetricsConfig, OverflowStrategy,
    PersistenceConfig, QueueConfig, RetryConfig, WebhookConfig,
};

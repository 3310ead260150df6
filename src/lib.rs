//! # Lead Queue
//!
//! A capacity-aware processing queue that decides which leads get contacted
//! on which business day.
//!
//! Submitted leads become queue items. The distribution engine places them on
//! working days without exceeding the daily (and optional weekly) limit,
//! highest priority first. A recurring dispatcher claims items once they are
//! due, hands them to an outbound [`MessageSender`](core::MessageSender) under
//! a timeout and feeds the outcome back into the item state machine, which
//! retries failures with linear backoff until `max_attempts` is reached.
//!
//! ## Key Features
//!
//! - **Business calendar**: working weekdays, holidays, opening hours and a
//!   fixed UTC offset
//! - **Capacity ledger**: per-date reservations committed with compare-and-set,
//!   so concurrent runs never over-commit a day
//! - **Overflow**: leftovers roll to the next working day up to a horizon,
//!   then are rejected rather than dropped
//! - **Retry state machine**: `pending → queued → processing → completed|failed`
//!   with bounded attempts
//! - **Health metrics**: queue depth, success rate and a discrete health level
//!   that degrades to `critical` instead of erroring
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lead_queue::builders::{load_config_from_env, QueueServiceBuilder};
//! use lead_queue::runtime::Candidate;
//!
//! let config = load_config_from_env()?;
//! let service = QueueServiceBuilder::new(config).build()?;
//!
//! let outcome = service
//!     .prepare_queue(vec![Candidate::new("lead-42"), Candidate::new("lead-43")])
//!     .await?;
//! println!("scheduled {}, rejected {}", outcome.scheduled.len(), outcome.rejected.len());
//!
//! service.start_processing();
//! let metrics = service.get_metrics().await;
//! println!("health: {:?}", metrics.queue_health);
//! ```
//!
//! For end-to-end scenarios see `tests/queue_scenarios_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Scheduling core: calendar, capacity, distribution, state machine, dispatch and metrics.
pub mod core;
/// Configuration models for the calendar, capacity, retries and dispatch.
pub mod config;
/// Builders to construct the queue service from configuration.
pub mod builders;
/// Infrastructure adapters for persistence and outbound messaging.
pub mod infra;
/// Processing loop, spawner and the queue service surface.
pub mod runtime;
/// Shared utilities.
pub mod util;

//! Construction helpers for hosts embedding the queue.

pub mod service_builder;

pub use service_builder::{load_config_file, load_config_from_env, QueueServiceBuilder};

//! Runtime wiring: spawner, processing loop and the queue service surface.

pub mod api;
pub mod processing_loop;
pub mod tokio_spawner;

pub use api::{Candidate, PrepareQueueResponse, QueueService};
pub use processing_loop::ProcessingLoop;
pub use tokio_spawner::{Spawn, TokioSpawner};

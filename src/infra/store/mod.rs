//! Queue store backends.

pub mod memory;

pub use memory::InMemoryStore;

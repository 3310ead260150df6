//! Infrastructure adapters for persistence and outbound messaging.

pub mod sender;
pub mod store;

#[cfg(feature = "webhook")]
pub use sender::WebhookSender;
pub use store::InMemoryStore;

//! Outbound message senders.

#[cfg(feature = "webhook")]
pub mod webhook;

#[cfg(feature = "webhook")]
pub use webhook::WebhookSender;

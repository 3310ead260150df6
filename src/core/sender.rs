//! Outbound messaging port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::item::{ItemId, QueueItem, SubjectId};
use crate::core::SendError;

/// One outbound message for a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Item being processed.
    pub item_id: ItemId,
    /// Lead the message is for.
    pub subject_id: SubjectId,
    /// Channel payload; the queue does not generate message content.
    pub payload: serde_json::Value,
    /// Key the provider uses to drop duplicate deliveries.
    pub idempotency_key: String,
}

impl SendRequest {
    /// Build the request for a claimed item. The idempotency key is the item id.
    pub fn for_item(item: &QueueItem) -> Self {
        Self {
            item_id: item.id,
            subject_id: item.subject_id.clone(),
            payload: serde_json::json!({
                "priority": item.priority,
                "attempt": item.attempts + 1,
                "max_attempts": item.max_attempts,
                "metadata": item.metadata,
            }),
            idempotency_key: item.id.to_string(),
        }
    }
}

/// Provider acknowledgement of a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-side message id, when the channel returns one.
    pub provider_message_id: Option<String>,
}

/// Abstraction for the outbound messaging channel.
///
/// The channel is fallible and possibly slow; the dispatcher runs each call as
/// its own task and applies the configured timeout around it.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use lead_queue::core::{MessageSender, SendError, SendReceipt, SendRequest};
///
/// struct LogSender;
///
/// #[async_trait]
/// impl MessageSender for LogSender {
///     async fn send(&self, request: SendRequest) -> Result<SendReceipt, SendError> {
///         tracing::info!(subject = %request.subject_id, "would send");
///         Ok(SendReceipt::default())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Deliver one message.
    async fn send(&self, request: SendRequest) -> Result<SendReceipt, SendError>;
}

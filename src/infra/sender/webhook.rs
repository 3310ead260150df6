//! Webhook sender: posts each message to an HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::WebhookConfig;
use crate::core::{MessageSender, QueueError, SendError, SendReceipt, SendRequest};

/// Provider acknowledgement body. Both fields are optional.
#[derive(Debug, Default, Deserialize)]
struct WebhookAck {
    #[serde(default, alias = "id")]
    message_id: Option<String>,
}

/// [`MessageSender`] that POSTs the request as JSON.
///
/// The item id travels in the `Idempotency-Key` header so the provider can
/// drop a redelivery after an ambiguous timeout.
pub struct WebhookSender {
    client: Client,
    url: String,
    auth_token: Option<String>,
}

impl WebhookSender {
    /// Build a sender from configuration. Fails when no URL is configured.
    pub fn new(config: &WebhookConfig, timeout: Duration) -> Result<Self, QueueError> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| QueueError::Configuration("webhook url is not configured".into()))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueueError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url,
            auth_token: config.auth_token.clone(),
        })
    }

    /// Target endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }
}

fn classify(status: StatusCode, body: &str) -> SendError {
    let detail = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        SendError::Transport(detail)
    } else if status.is_client_error() {
        SendError::Rejected(detail)
    } else {
        SendError::Transport(detail)
    }
}

#[async_trait]
impl MessageSender for WebhookSender {
    async fn send(&self, request: SendRequest) -> Result<SendReceipt, SendError> {
        let mut call = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&request);
        if let Some(token) = &self.auth_token {
            call = call.bearer_auth(token);
        }

        let resp = call.send().await.map_err(|e| {
            if e.is_timeout() {
                SendError::Timeout
            } else {
                SendError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(item_id = %request.item_id, %status, "webhook refused message");
            return Err(classify(status, &body));
        }

        // An empty or non-JSON body is still a success.
        let ack = resp.json::<WebhookAck>().await.unwrap_or_default();
        Ok(SendReceipt {
            provider_message_id: ack.message_id,
        })
    }
}

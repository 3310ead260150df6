//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use lead_queue::builders::{load_config_file, QueueServiceBuilder};
use lead_queue::config::QueueConfig;
use lead_queue::core::{MessageSender, QueueError, SendError, SendReceipt, SendRequest};
use lead_queue::infra::InMemoryStore;

struct NullSender;

#[async_trait]
impl MessageSender for NullSender {
    async fn send(&self, _request: SendRequest) -> Result<SendReceipt, SendError> {
        Ok(SendReceipt::default())
    }
}

fn temp_config(contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("lead-queue-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_config_file() {
    let path = temp_config(r#"{"capacity": {"daily_limit": 12}}"#);
    let cfg = load_config_file(&path).unwrap();
    assert_eq!(cfg.capacity.daily_limit, 12);
    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_config_file_reports_path() {
    let path = temp_config(r#"{"capacity": {"daily_limit": 0}}"#);
    let err = load_config_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("daily_limit"));
    assert!(err.to_string().contains("parsing queue config"));
    std::fs::remove_file(path).ok();

    assert!(load_config_file(std::path::Path::new("/nonexistent/lead-queue.json")).is_err());
}

#[tokio::test]
async fn test_builder_with_collaborators() {
    let service = QueueServiceBuilder::new(QueueConfig::default())
        .with_store(Arc::new(InMemoryStore::new()))
        .with_sender(Arc::new(NullSender))
        .build()
        .unwrap();
    assert_eq!(service.config().capacity.daily_limit, 100);
    assert!(!service.is_processing());
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let mut cfg = QueueConfig::default();
    cfg.dispatch.batch_size = 0;
    let result = QueueServiceBuilder::new(cfg)
        .with_sender(Arc::new(NullSender))
        .build();
    assert!(matches!(result, Err(QueueError::Configuration(_))));
}

#[tokio::test]
async fn test_builder_requires_webhook_url_without_sender() {
    let result = QueueServiceBuilder::new(QueueConfig::default()).build();
    assert!(matches!(result, Err(QueueError::Configuration(_))));
}

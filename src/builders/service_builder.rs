//! Builders to construct the queue service from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::config::QueueConfig;
use crate::core::{AppResult, MessageSender, QueueError, QueueStore};
use crate::infra::InMemoryStore;
use crate::runtime::{QueueService, Spawn, TokioSpawner};
use crate::util::clock::{Clock, SystemClock};

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "LEAD_QUEUE_CONFIG";

/// Load configuration the way a host process does: `.env` first, then the
/// file named by `LEAD_QUEUE_CONFIG` (defaults when unset), then
/// `LEAD_QUEUE_*` overrides.
pub fn load_config_from_env() -> AppResult<QueueConfig> {
    // A missing .env file is normal outside development.
    let _ = dotenvy::dotenv();
    let base = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => load_config_file(Path::new(&path))?,
        Err(_) => QueueConfig::default(),
    };
    base.apply_env_overrides()
        .map_err(|e| anyhow::anyhow!(e))
        .context("applying LEAD_QUEUE_* overrides")
}

/// Read and validate a JSON configuration file.
pub fn load_config_file(path: &Path) -> AppResult<QueueConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading queue config {}", path.display()))?;
    QueueConfig::from_json_str(&raw)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("parsing queue config {}", path.display()))
}

/// Assembles a [`QueueService`] from configuration and collaborators.
///
/// Unset collaborators fall back to an in-memory store, the system clock
/// and, with the `webhook` feature, a webhook sender built from config.
pub struct QueueServiceBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn QueueStore>>,
    sender: Option<Arc<dyn MessageSender>>,
    clock: Option<Arc<dyn Clock>>,
}

impl QueueServiceBuilder {
    /// Start from a configuration.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            store: None,
            sender: None,
            clock: None,
        }
    }

    /// Configuration being built.
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Use a persistence backend.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a message sender.
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Use a clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build on the current tokio runtime.
    pub fn build(self) -> Result<QueueService<TokioSpawner>, QueueError> {
        let spawner = TokioSpawner::current()?;
        self.build_with_spawner(spawner)
    }

    /// Build with an explicit spawner.
    pub fn build_with_spawner<S: Spawn>(mut self, spawner: S) -> Result<QueueService<S>, QueueError> {
        let sender = match self.sender.take() {
            Some(sender) => sender,
            None => default_sender(&self.config)?,
        };
        let store = self
            .store
            .take()
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let clock = self.clock.take().unwrap_or_else(|| Arc::new(SystemClock));
        QueueService::new(self.config, store, sender, clock, spawner)
    }
}

#[cfg(feature = "webhook")]
fn default_sender(config: &QueueConfig) -> Result<Arc<dyn MessageSender>, QueueError> {
    let sender =
        crate::infra::WebhookSender::new(&config.webhook, config.dispatch.send_timeout())?;
    Ok(Arc::new(sender))
}

#[cfg(not(feature = "webhook"))]
fn default_sender(_config: &QueueConfig) -> Result<Arc<dyn MessageSender>, QueueError> {
    Err(QueueError::Configuration("no message sender configured".into()))
}

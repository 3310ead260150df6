//! Queue, calendar and dispatch configuration structures.

use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Working-day rules used by the business calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessDayPolicy {
    /// Weekdays on which leads may be contacted.
    pub working_days: Vec<Weekday>,
    /// Dates excluded even when they fall on a working weekday.
    pub holidays: Vec<NaiveDate>,
    /// Local opening time.
    pub start_time: NaiveTime,
    /// Local closing time (exclusive).
    pub end_time: NaiveTime,
    /// Fixed offset of the business timezone from UTC, in minutes.
    pub utc_offset_minutes: i32,
}

impl Default for BusinessDayPolicy {
    fn default() -> Self {
        Self {
            working_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            holidays: Vec::new(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            utc_offset_minutes: 0,
        }
    }
}

impl BusinessDayPolicy {
    /// Validate policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.working_days.is_empty() {
            return Err("at least one working day must be configured".into());
        }
        if self.start_time >= self.end_time {
            return Err(format!(
                "start_time {} must be before end_time {}",
                self.start_time, self.end_time
            ));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err("utc_offset_minutes must be within one day".into());
        }
        Ok(())
    }
}

/// Overflow handling when a day's capacity is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// Roll leftovers to the next working day.
    #[default]
    DistributeNextDay,
}

/// Throughput limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Items per working day.
    pub daily_limit: u32,
    /// Items per ISO week, if capped.
    pub weekly_limit: Option<u32>,
    /// Working days searched before scheduling gives up.
    pub horizon_days: u32,
    /// What happens when a day fills up.
    pub overflow: OverflowStrategy,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            daily_limit: 100,
            weekly_limit: None,
            horizon_days: 30,
            overflow: OverflowStrategy::DistributeNextDay,
        }
    }
}

/// Retry and backoff settings for failed sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed per item.
    pub max_attempts: u32,
    /// Linear backoff step in seconds (`attempts * base_delay_secs`).
    pub base_delay_secs: u64,
    /// Upper bound for a single backoff, in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 15 * 60,
            max_delay_secs: 24 * 60 * 60,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempts`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let secs = self
            .base_delay_secs
            .saturating_mul(u64::from(attempts))
            .min(self.max_delay_secs);
        Duration::from_secs(secs)
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum items claimed per tick.
    pub batch_size: usize,
    /// Seconds between ticks of the processing loop.
    pub tick_interval_secs: u64,
    /// Timeout applied to each send call, in seconds.
    pub send_timeout_secs: u64,
    /// Minimum spacing between consecutive sends, in milliseconds.
    pub send_interval_ms: u64,
    /// Age after which a `processing` item is considered stuck, in seconds.
    pub stale_processing_secs: u64,
    /// The processing loop runs a reconcile sweep every this many ticks; 0 disables it.
    pub reconcile_every_ticks: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            tick_interval_secs: 60,
            send_timeout_secs: 30,
            send_interval_ms: 0,
            stale_processing_secs: 15 * 60,
            reconcile_every_ticks: 10,
        }
    }
}

impl DispatchConfig {
    /// Send timeout as a duration.
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Tick interval as a duration.
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

/// Persistence call policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Timeout per store call, in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first failed call.
    pub max_retries: u32,
    /// Initial retry delay, doubled on each retry, in milliseconds.
    pub retry_base_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_retries: 2,
            retry_base_ms: 50,
        }
    }
}

/// Metrics monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// How long a computed snapshot is served from cache, in seconds.
    pub cache_ttl_secs: u64,
    /// Trailing window for the success rate, in days.
    pub success_window_days: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            success_window_days: 7,
        }
    }
}

/// Optional webhook sender settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Endpoint receiving send requests.
    pub url: Option<String>,
    /// Bearer token sent with each request.
    pub auth_token: Option<String>,
}

/// Root queue configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Working-day rules.
    pub business_days: BusinessDayPolicy,
    /// Throughput limits.
    pub capacity: CapacityConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Dispatcher settings.
    pub dispatch: DispatchConfig,
    /// Persistence call policy.
    pub persistence: PersistenceConfig,
    /// Metrics settings.
    pub metrics: MetricsConfig,
    /// Webhook sender settings.
    pub webhook: WebhookConfig,
}

impl QueueConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.business_days
            .validate()
            .map_err(|e| format!("business_days invalid: {e}"))?;
        if self.capacity.daily_limit == 0 {
            return Err("daily_limit must be greater than 0".into());
        }
        if self.capacity.weekly_limit == Some(0) {
            return Err("weekly_limit must be greater than 0 when set".into());
        }
        if self.capacity.horizon_days == 0 {
            return Err("horizon_days must be greater than 0".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        if self.retry.base_delay_secs == 0 {
            return Err("base_delay_secs must be greater than 0".into());
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            return Err("max_delay_secs must be at least base_delay_secs".into());
        }
        if self.dispatch.batch_size == 0 {
            return Err("batch_size must be greater than 0".into());
        }
        if self.dispatch.tick_interval_secs == 0 {
            return Err("tick_interval_secs must be greater than 0".into());
        }
        if self.dispatch.send_timeout_secs == 0 {
            return Err("send_timeout_secs must be greater than 0".into());
        }
        if self.persistence.timeout_ms == 0 {
            return Err("persistence timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `LEAD_QUEUE_*` environment overrides, then validate.
    pub fn apply_env_overrides(mut self) -> Result<Self, String> {
        if let Ok(v) = std::env::var("LEAD_QUEUE_DAILY_LIMIT") {
            self.capacity.daily_limit = v
                .parse()
                .map_err(|e| format!("LEAD_QUEUE_DAILY_LIMIT: {e}"))?;
        }
        if let Ok(v) = std::env::var("LEAD_QUEUE_WEEKLY_LIMIT") {
            self.capacity.weekly_limit = Some(
                v.parse()
                    .map_err(|e| format!("LEAD_QUEUE_WEEKLY_LIMIT: {e}"))?,
            );
        }
        if let Ok(v) = std::env::var("LEAD_QUEUE_WEBHOOK_URL") {
            self.webhook.url = Some(v);
        }
        if let Ok(v) = std::env::var("LEAD_QUEUE_WEBHOOK_TOKEN") {
            self.webhook.auth_token = Some(v);
        }
        self.validate()?;
        Ok(self)
    }
}

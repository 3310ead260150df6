//! Tests for configuration validation

use chrono::Weekday;
use lead_queue::config::{BusinessDayPolicy, QueueConfig, RetryConfig};

#[test]
fn test_default_config_is_valid() {
    let cfg = QueueConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.capacity.daily_limit, 100);
    assert_eq!(cfg.retry.max_attempts, 3);
}

#[test]
fn test_zero_daily_limit_is_invalid() {
    let mut cfg = QueueConfig::default();
    cfg.capacity.daily_limit = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_weekly_limit_is_invalid() {
    let mut cfg = QueueConfig::default();
    cfg.capacity.weekly_limit = Some(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_horizon_is_invalid() {
    let mut cfg = QueueConfig::default();
    cfg.capacity.horizon_days = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_retry_delay_bounds() {
    let mut cfg = QueueConfig::default();
    cfg.retry = RetryConfig {
        max_attempts: 3,
        base_delay_secs: 600,
        max_delay_secs: 60,
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_empty_working_week_is_invalid() {
    let mut cfg = QueueConfig::default();
    cfg.business_days = BusinessDayPolicy {
        working_days: vec![],
        ..BusinessDayPolicy::default()
    };
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("business_days"));
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = QueueConfig::from_json_str(
        r#"{
            "business_days": {
                "working_days": ["Mon", "Wed", "Fri"],
                "holidays": ["2026-12-25"],
                "start_time": "08:30:00",
                "end_time": "17:00:00",
                "utc_offset_minutes": -300
            },
            "capacity": { "daily_limit": 40, "weekly_limit": 150 }
        }"#,
    )
    .unwrap();
    assert_eq!(
        cfg.business_days.working_days,
        vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]
    );
    assert_eq!(cfg.business_days.utc_offset_minutes, -300);
    assert_eq!(cfg.capacity.daily_limit, 40);
    assert_eq!(cfg.capacity.weekly_limit, Some(150));
    assert_eq!(cfg.capacity.horizon_days, 30);
    assert_eq!(cfg.dispatch.batch_size, 10);
}

#[test]
fn test_from_json_str_rejects_invalid() {
    assert!(QueueConfig::from_json_str("{ not json").is_err());
    assert!(QueueConfig::from_json_str(r#"{"capacity": {"daily_limit": 0}}"#).is_err());
    assert!(QueueConfig::from_json_str(
        r#"{"business_days": {"start_time": "18:00:00", "end_time": "09:00:00"}}"#
    )
    .is_err());
}

// The only test in this binary that touches LEAD_QUEUE_* variables.
#[test]
fn test_env_overrides() {
    std::env::set_var("LEAD_QUEUE_DAILY_LIMIT", "25");
    std::env::set_var("LEAD_QUEUE_WEEKLY_LIMIT", "100");
    std::env::set_var("LEAD_QUEUE_WEBHOOK_URL", "https://hooks.example.test/send");
    let cfg = QueueConfig::default().apply_env_overrides().unwrap();
    assert_eq!(cfg.capacity.daily_limit, 25);
    assert_eq!(cfg.capacity.weekly_limit, Some(100));
    assert_eq!(
        cfg.webhook.url.as_deref(),
        Some("https://hooks.example.test/send")
    );

    std::env::set_var("LEAD_QUEUE_DAILY_LIMIT", "lots");
    assert!(QueueConfig::default().apply_env_overrides().is_err());

    std::env::remove_var("LEAD_QUEUE_DAILY_LIMIT");
    std::env::remove_var("LEAD_QUEUE_WEEKLY_LIMIT");
    std::env::remove_var("LEAD_QUEUE_WEBHOOK_URL");
}

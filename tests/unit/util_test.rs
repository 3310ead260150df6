//! Tests for utility functions

use chrono::{TimeZone, Utc};
use lead_queue::util::{init_tracing, Clock, ManualClock, SystemClock, DEFAULT_LOG_DIRECTIVE};

#[test]
fn test_manual_clock() {
    let start = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    assert_eq!(clock.now(), start);
    clock.advance(chrono::Duration::hours(2));
    assert_eq!(clock.now(), start + chrono::Duration::hours(2));
}

#[test]
fn test_system_clock_moves_forward() {
    let clock = SystemClock;
    let a = clock.now();
    let b = clock.now();
    assert!(b >= a);
}

#[test]
fn test_init_tracing_is_idempotent() {
    assert!(DEFAULT_LOG_DIRECTIVE.starts_with("lead_queue"));
    init_tracing();
    init_tracing();
}

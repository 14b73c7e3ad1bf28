//! End-to-end tests of the spawned alert detector: threshold crossings in
//! both directions, boundary behavior at exactly the limit, span queries,
//! and post-cancellation state.

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use may::sync::mpsc;
use wirehound::alert::{AlertConfig, AlertDetector, AlertState, Notification};
use wirehound::cancel::CancelToken;
use wirehound::monitor::Monitor;

/// Detector config with short ticks so tests settle within milliseconds.
fn fast_config(limit: u64) -> AlertConfig {
    AlertConfig {
        upper_limit: limit,
        test_span: Duration::from_secs(60),
        flush_interval: Duration::from_millis(100),
        sample_interval: Duration::from_millis(100),
        start_state: AlertState::Nominal,
    }
}

/// A few sample ticks' worth of settling time.
fn settle() {
    std::thread::sleep(Duration::from_millis(500));
}

#[test]
fn test_nominal_to_alert() {
    common::setup_may_runtime();
    let (notify_tx, notify_rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let detector = AlertDetector::new(cancel.clone(), fast_config(10), notify_tx);

    // Fifty observations spaced a second apart, all within the test span.
    let start = SystemTime::now();
    for i in 0..50 {
        detector.increment(1, start + Duration::from_secs(i));
    }

    let notification = notify_rx.recv().expect("notify channel closed");
    assert!(
        matches!(notification, Notification::Alert { hits: 50, .. }),
        "expected an alert for all 50 hits, got {notification:?}"
    );
    assert!(matches!(detector.get_state(), Notification::Alert { .. }));
    cancel.cancel();
}

#[test]
fn test_alert_to_nominal() {
    common::setup_may_runtime();
    let (notify_tx, notify_rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let config = AlertConfig {
        start_state: AlertState::Alerted,
        ..fast_config(10)
    };
    // Alerted start over an empty monitor recovers on the first sample.
    let detector = AlertDetector::new(cancel.clone(), config, notify_tx);

    let notification = notify_rx.recv().expect("notify channel closed");
    assert!(
        matches!(notification, Notification::Nominal { .. }),
        "expected recovery, got {notification:?}"
    );
    assert!(matches!(detector.get_state(), Notification::Nominal { .. }));
    cancel.cancel();
}

#[test]
fn test_no_transition_at_exact_limit() {
    common::setup_may_runtime();
    let cancel = CancelToken::new();

    // Nominal side: exactly the limit must not alert.
    let (notify_tx, notify_rx) = mpsc::channel();
    let detector = AlertDetector::new(cancel.clone(), fast_config(10), notify_tx);
    detector.increment(10, SystemTime::now());
    settle();
    assert!(notify_rx.try_recv().is_err(), "boundary produced an alert");
    assert!(matches!(detector.get_state(), Notification::Nominal { .. }));

    // Alerted side: exactly the limit must not recover.
    let monitor = Arc::new(Monitor::new());
    monitor.increment(10, SystemTime::now());
    let (notify_tx, notify_rx) = mpsc::channel();
    let config = AlertConfig {
        start_state: AlertState::Alerted,
        ..fast_config(10)
    };
    let alerted = AlertDetector::with_monitor(monitor, cancel.clone(), config, notify_tx);
    settle();
    assert!(notify_rx.try_recv().is_err(), "boundary produced a recovery");
    assert!(matches!(alerted.get_state(), Notification::Alert { hits: 10, .. }));
    cancel.cancel();
}

#[test]
fn test_increments_before_flush_are_visible_after_flush() {
    common::setup_may_runtime();
    let (notify_tx, _notify_rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let detector = AlertDetector::new(cancel.clone(), fast_config(1_000), notify_tx);

    let now = SystemTime::now();
    for _ in 0..25 {
        detector.increment(1, now);
    }
    settle();
    let count = detector.get_span_count(now - Duration::from_secs(60), now + Duration::from_secs(60));
    assert_eq!(count, 25);
    cancel.cancel();
}

#[test]
fn test_get_state_reports_exited_after_cancel() {
    common::setup_may_runtime();
    let (notify_tx, _notify_rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let detector = AlertDetector::new(cancel.clone(), fast_config(10), notify_tx);

    assert!(matches!(detector.get_state(), Notification::Nominal { .. }));
    cancel.cancel();
    settle();
    assert!(matches!(detector.get_state(), Notification::Exited { .. }));
    // Post-cancellation increments are benign no-ops.
    detector.increment(1, SystemTime::now());
}

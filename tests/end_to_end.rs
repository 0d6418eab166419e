//! Integration-level coverage of the tick loop driven through the real
//! `EventLogWriter` (JSONL on disk) and `SelfMonitor` (state.json on disk),
//! rather than the in-memory `Vec` sink the unit tests in `controller.rs`
//! use. Exercises the scenarios end to end: samples in, ticks, file(s) out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use adaptive_control_plane::prelude::*;

fn sample(ts: i64, latency: f64) -> MetricSample {
    MetricSample {
        timestamp_ms: ts,
        total_requests: 100,
        successful_requests: 99,
        latency_p99_seconds: latency,
        false_positive_alerts: None,
    }
}

fn read_events(path: &std::path::Path) -> Vec<serde_json::Value> {
    let raw = std::fs::read_to_string(path).unwrap_or_default();
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("each line is one JSON object"))
        .collect()
}

#[test]
fn shadow_trigger_is_written_to_the_event_log_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let event_log_path = dir.path().join("events.jsonl");
    let event_log = EventLogWriter::open(EventLogConfig {
        path: event_log_path.clone(),
        fallback_path: None,
        ..EventLogConfig::default()
    });

    let mut config = AdaptiveControlConfig::default();
    config.targets = vec![AllowlistEntry::default()];
    let metrics = MetricsCollector::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = Arc::clone(&calls);
    let mut controller = AdaptiveController::new(config, metrics, Box::new(event_log))
        .with_guard_mode_setter(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            true
        });

    for i in 0..30 {
        controller.metrics().ingest("guard", sample(i * 1_000, 0.8));
    }
    let applied = controller.tick(30_000);
    assert_eq!(applied.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let events = read_events(&event_log_path);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["signal_type"], "switch_to_shadow");
    assert_eq!(events[0]["actor"], "adaptive_control");
}

#[test]
fn restore_after_cooldown_appends_a_second_line_to_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let event_log_path = dir.path().join("events.jsonl");
    let event_log = EventLogWriter::open(EventLogConfig {
        path: event_log_path.clone(),
        fallback_path: None,
        ..EventLogConfig::default()
    });

    let mut config = AdaptiveControlConfig::default();
    config.targets = vec![AllowlistEntry::default()];
    let metrics = MetricsCollector::new();
    let mut controller = AdaptiveController::new(config, metrics, Box::new(event_log))
        .with_guard_mode_setter(|_| true);

    for i in 0..30 {
        controller.metrics().ingest("guard", sample(i * 1_000, 0.8));
    }
    controller.tick(30_000);
    assert_eq!(controller.modes().guard_mode, "shadow");

    let dwell_ms = (AdaptiveControlConfig::default().dwell_time_seconds * 1000.0) as i64;
    let now = 30_000 + dwell_ms + 1_000;
    for i in 0..30 {
        controller
            .metrics()
            .ingest("guard", sample(now - 29_000 + i * 1_000, 0.1));
    }
    controller.tick(now);
    assert_eq!(controller.modes().guard_mode, "enforce");

    let events = read_events(&event_log_path);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["signal_type"], "switch_to_shadow");
    assert_eq!(events[1]["signal_type"], "restore_enforce");
}

#[test]
fn killswitch_suppresses_guard_and_leaves_event_log_empty() {
    let dir = tempfile::tempdir().unwrap();
    let event_log_path = dir.path().join("events.jsonl");
    let event_log = EventLogWriter::open(EventLogConfig {
        path: event_log_path.clone(),
        fallback_path: None,
        ..EventLogConfig::default()
    });

    let mut config = AdaptiveControlConfig::default();
    config.targets = vec![AllowlistEntry::default()];
    let metrics = MetricsCollector::new();
    let mut controller = AdaptiveController::new(config, metrics, Box::new(event_log))
        .with_guard_mode_setter(|_| true)
        .with_killswitch(Box::new(|s| s == "guard"));

    for i in 0..30 {
        controller.metrics().ingest("guard", sample(i * 1_000, 0.8));
    }
    let applied = controller.tick(30_000);
    assert!(applied.is_empty());
    assert!(read_events(&event_log_path).is_empty());
}

#[test]
fn config_drift_is_a_noop_tick_and_state_file_still_reports_running() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");

    let mut config = AdaptiveControlConfig::default();
    config.targets = vec![AllowlistEntry::default()];
    config.guard_slo_query = "drifted".to_string();
    let metrics = MetricsCollector::new();
    for i in 0..30 {
        metrics.ingest("guard", sample(i * 1_000, 0.8));
    }
    let mut controller = AdaptiveController::new(
        config,
        metrics,
        Box::new(Vec::<ControlDecisionEvent>::new()),
    );

    let mut monitor = SelfMonitor::new(state_path.clone());
    let applied = controller.tick(30_000);
    assert!(applied.is_empty());
    monitor.record_tick(applied.len());
    let modes = controller.modes();
    monitor.maybe_write_state(controller.state(), &modes.guard_mode, &modes.pdf_mode, 0);

    let state = SelfMonitor::read_state(&state_path).unwrap();
    assert_eq!(state.controller_state, "running");
    assert_eq!(state.counters.ticks, 1);
    assert_eq!(state.counters.signals_applied, 0);
}

#[test]
fn reload_config_mid_run_retunes_thresholds_without_losing_mode() {
    let dir = tempfile::tempdir().unwrap();
    let event_log = EventLogWriter::open(EventLogConfig {
        path: dir.path().join("events.jsonl"),
        fallback_path: None,
        ..EventLogConfig::default()
    });

    let mut config = AdaptiveControlConfig::default();
    config.targets = vec![AllowlistEntry::default()];
    let metrics = MetricsCollector::new();
    let mut controller = AdaptiveController::new(config, metrics, Box::new(event_log))
        .with_guard_mode_setter(|_| true);

    for i in 0..30 {
        controller.metrics().ingest("guard", sample(i * 1_000, 0.8));
    }
    controller.tick(30_000);
    assert_eq!(controller.modes().guard_mode, "shadow");

    let mut tighter = AdaptiveControlConfig::default();
    tighter.targets = vec![AllowlistEntry::default()];
    tighter.dwell_time_seconds = 1.0;
    tighter.cooldown_period_seconds = 1.0;
    controller.reload_config(tighter);

    // Mode survives the reload.
    assert_eq!(controller.modes().guard_mode, "shadow");

    for i in 0..30 {
        controller
            .metrics()
            .ingest("guard", sample(32_000 + i * 1_000, 0.1));
    }
    let applied = controller.tick(62_000);
    assert_eq!(applied.len(), 1);
    assert_eq!(controller.modes().guard_mode, "enforce");
}

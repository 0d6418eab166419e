//! Daemon self-monitoring: RSS tracking, thread health checks, and the
//! `state.json` file that backs `actl status` (§14).
//!
//! The state file is the only channel between the running daemon and the
//! CLI. Written atomically (write to `.tmp`, then `rename()`) every
//! `DAEMON_STATE_WRITE_INTERVAL_SECS` seconds so `actl status` always reads a
//! consistent snapshot, even mid-write.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::control::model::ControllerState;

// ──────────────────── constants ────────────────────

/// How often the daemon writes `state.json` (seconds).
pub const DAEMON_STATE_WRITE_INTERVAL_SECS: u64 = 30;

/// Floor for treating `state.json` as stale (seconds).
///
/// Must be `>= 2 × DAEMON_STATE_WRITE_INTERVAL_SECS` so that `actl status`
/// never reports the daemon as absent simply because a write cycle hasn't
/// completed yet.
pub const DAEMON_STATE_STALE_THRESHOLD_SECS: u64 = 90;

// ──────────────────── state file schema ────────────────────

/// Top-level state written to `state.json` for CLI consumption.
///
/// All fields use `#[serde(default)]` so that minor schema evolution (new
/// fields added by a newer daemon, or old fields removed) does not hard-fail
/// deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonState {
    pub version: String,
    pub pid: u32,
    pub started_at: String,
    pub uptime_seconds: u64,
    pub last_updated: String,
    pub controller_state: String,
    pub failsafe_reason: Option<String>,
    pub modes: ModesState,
    pub last_tick: LastTickState,
    pub counters: Counters,
    pub memory_rss_bytes: u64,
}

/// Current subsystem mode tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModesState {
    pub guard_mode: String,
    pub pdf_mode: String,
}

/// Last tick summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastTickState {
    pub at: Option<String>,
    pub signals_applied: usize,
}

/// Cumulative counters since daemon start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub ticks: u64,
    pub signals_applied: u64,
    pub callback_failures: u64,
    pub config_drift_ticks: u64,
    /// Audit events silently dropped due to event-log back-pressure.
    pub dropped_log_events: u64,
}

// ──────────────────── health tracking ────────────────────

/// Thread health status for monitoring.
#[derive(Debug, Clone)]
pub enum ThreadStatus {
    Running {
        name: String,
        last_heartbeat: Instant,
    },
    Stalled {
        name: String,
        stalled_since: Instant,
    },
    Dead {
        name: String,
        died_at: Instant,
        error: String,
    },
}

impl ThreadStatus {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Running { name, .. } | Self::Stalled { name, .. } | Self::Dead { name, .. } => {
                name
            }
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Atomic heartbeat timestamp for thread health detection.
///
/// The tick thread increments this every iteration. The self-monitor checks
/// for staleness (stall threshold without update → stalled).
#[derive(Debug)]
pub struct ThreadHeartbeat {
    /// Milliseconds since process-local monotonic origin (`Instant`).
    last_beat_epoch_ms: AtomicU64,
    name: String,
}

impl ThreadHeartbeat {
    /// Create a new heartbeat tracker for a named thread.
    #[must_use]
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            last_beat_epoch_ms: AtomicU64::new(epoch_ms()),
            name: name.to_string(),
        })
    }

    /// Record a heartbeat (called by the tick thread).
    pub fn beat(&self) {
        self.last_beat_epoch_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    /// Check thread status based on heartbeat staleness.
    #[must_use]
    pub fn status(&self, stall_threshold: Duration) -> ThreadStatus {
        let last = self.last_beat_epoch_ms.load(Ordering::Relaxed);
        let now = epoch_ms();
        let elapsed_ms = now.saturating_sub(last);

        #[allow(clippy::cast_possible_truncation)]
        let threshold_ms = stall_threshold.as_millis() as u64;
        let approx_instant = Instant::now()
            .checked_sub(Duration::from_millis(elapsed_ms))
            .unwrap_or_else(Instant::now);

        if elapsed_ms > threshold_ms {
            ThreadStatus::Stalled {
                name: self.name.clone(),
                stalled_since: approx_instant,
            }
        } else {
            ThreadStatus::Running {
                name: self.name.clone(),
                last_heartbeat: approx_instant,
            }
        }
    }
}

/// Milliseconds since a process-local monotonic origin.
///
/// Uses `Instant` (monotonic clock) instead of `SystemTime` to avoid false
/// heartbeat readings when the system clock is adjusted.
fn epoch_ms() -> u64 {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    #[allow(clippy::cast_possible_truncation)]
    let ms = origin.elapsed().as_millis() as u64;
    ms
}

// ──────────────────── self-monitor ────────────────────

/// Periodic self-monitoring: writes state file, checks RSS, reports status.
pub struct SelfMonitor {
    state_file_path: PathBuf,
    start_time: Instant,
    started_at_iso: String,
    write_interval: Duration,
    last_write: Option<Instant>,
    rss_limit_bytes: u64,

    // Mutable counters updated by the tick loop.
    pub tick_count: u64,
    pub last_tick_at: Option<String>,
    pub last_tick_signals_applied: usize,
    pub signals_applied_total: u64,
    pub callback_failures_total: u64,
    pub config_drift_ticks_total: u64,
}

impl SelfMonitor {
    /// Create a new self-monitor.
    pub fn new(state_file_path: PathBuf) -> Self {
        let now = chrono::Utc::now();
        Self {
            state_file_path,
            start_time: Instant::now(),
            started_at_iso: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            write_interval: Duration::from_secs(DAEMON_STATE_WRITE_INTERVAL_SECS),
            last_write: None,
            rss_limit_bytes: 256 * 1024 * 1024, // 256 MB

            tick_count: 0,
            last_tick_at: None,
            last_tick_signals_applied: 0,
            signals_applied_total: 0,
            callback_failures_total: 0,
            config_drift_ticks_total: 0,
        }
    }

    /// Check if it's time to write the state file. If so, write it.
    ///
    /// Returns the current RSS in bytes (0 if unavailable).
    pub fn maybe_write_state(
        &mut self,
        controller_state: &ControllerState,
        guard_mode: &str,
        pdf_mode: &str,
        dropped_log_events: u64,
    ) -> u64 {
        let now = Instant::now();
        if let Some(last) = self.last_write
            && now.duration_since(last) < self.write_interval
        {
            return 0;
        }

        let rss = read_rss_bytes();

        if rss > self.rss_limit_bytes {
            eprintln!(
                "[ACP-SELFMON] WARNING: RSS {} MB exceeds limit {} MB",
                rss / (1024 * 1024),
                self.rss_limit_bytes / (1024 * 1024),
            );
        }

        let (state_label, failsafe_reason) = match controller_state {
            ControllerState::Running => ("running".to_string(), None),
            ControllerState::Suspended => ("suspended".to_string(), None),
            ControllerState::Failsafe { reason } => ("failsafe".to_string(), Some(reason.clone())),
        };

        let state = DaemonState {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            started_at: self.started_at_iso.clone(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            last_updated: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            controller_state: state_label,
            failsafe_reason,
            modes: ModesState {
                guard_mode: guard_mode.to_string(),
                pdf_mode: pdf_mode.to_string(),
            },
            last_tick: LastTickState {
                at: self.last_tick_at.clone(),
                signals_applied: self.last_tick_signals_applied,
            },
            counters: Counters {
                ticks: self.tick_count,
                signals_applied: self.signals_applied_total,
                callback_failures: self.callback_failures_total,
                config_drift_ticks: self.config_drift_ticks_total,
                dropped_log_events,
            },
            memory_rss_bytes: rss,
        };

        if let Err(e) = write_state_atomic(&self.state_file_path, &state) {
            eprintln!("[ACP-SELFMON] failed to write state file: {e}");
        }
        // Update last_write regardless of success to respect the interval
        // and prevent log spam on persistent errors (e.g. permission denied).
        self.last_write = Some(now);

        rss
    }

    /// Build a status string suitable for sd_notify STATUS.
    #[must_use]
    pub fn status_line(&self, controller_state: &ControllerState, guard_mode: &str, pdf_mode: &str) -> String {
        let rss_mb = read_rss_bytes() / (1024 * 1024);
        format!(
            "{controller_state} guard={guard_mode} pdf={pdf_mode} | \
             {ticks} ticks, {signals} signals applied | RSS {rss_mb} MB",
            ticks = self.tick_count,
            signals = self.signals_applied_total,
        )
    }

    /// Record a completed tick.
    pub fn record_tick(&mut self, signals_applied: usize) {
        self.tick_count += 1;
        self.last_tick_at =
            Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        self.last_tick_signals_applied = signals_applied;
        self.signals_applied_total += signals_applied as u64;
    }

    /// Sync the cumulative fault counters from the controller's own
    /// accounting. The controller is the single source of truth for both
    /// totals (it increments them at the exact point of truth inside
    /// `tick_inner`); the monitor just mirrors them into `state.json`.
    pub fn sync_fault_counters(&mut self, callback_failures_total: u64, config_drift_ticks_total: u64) {
        self.callback_failures_total = callback_failures_total;
        self.config_drift_ticks_total = config_drift_ticks_total;
    }

    /// Build a health snapshot from current state plus thread heartbeats.
    #[must_use]
    pub fn health_snapshot(
        &self,
        heartbeats: &[Arc<ThreadHeartbeat>],
        stall_threshold: Duration,
    ) -> Vec<ThreadStatus> {
        heartbeats.iter().map(|hb| hb.status(stall_threshold)).collect()
    }

    /// Read the state file (for `actl status`).
    pub fn read_state(path: &Path) -> std::result::Result<DaemonState, String> {
        let raw = fs::read_to_string(path).map_err(|e| format!("cannot read state file: {e}"))?;
        let state: DaemonState =
            serde_json::from_str(&raw).map_err(|e| format!("invalid state file: {e}"))?;

        if let Ok(updated) = chrono::DateTime::parse_from_rfc3339(&state.last_updated) {
            let age = chrono::Utc::now().signed_duration_since(updated);
            #[allow(clippy::cast_possible_wrap)]
            if age.num_seconds() > DAEMON_STATE_STALE_THRESHOLD_SECS as i64 {
                eprintln!(
                    "[ACP-STATUS] WARNING: state file is {}s old — daemon may be stalled",
                    age.num_seconds()
                );
            }
        }

        Ok(state)
    }
}

// ──────────────────── atomic state file write ────────────────────

/// Write state.json atomically: write to .tmp, then rename.
///
/// Sets 0o644 permissions on the temp file (Unix only) so the state file is
/// world-readable: the state file contains only operational telemetry
/// (controller state, uptime, counters) and must be readable by the CLI
/// running as a non-root user even when the daemon runs as root.
fn write_state_atomic(path: &Path, state: &DaemonState) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;

    let result = (|| {
        {
            use std::io::Write;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

// ──────────────────── RSS reading ────────────────────

/// Read current process RSS in bytes from /proc/self/status.
///
/// Returns 0 on non-Linux or if reading fails.
fn read_rss_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        read_rss_linux()
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

#[cfg(target_os = "linux")]
fn read_rss_linux() -> u64 {
    let Ok(status) = fs::read_to_string("/proc/self/status") else {
        return 0;
    };

    for line in status.lines() {
        if line.starts_with("VmRSS:") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2
                && let Ok(kb) = parts[1].parse::<u64>()
            {
                return kb * 1024; // kB to bytes
            }
        }
    }

    0
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_state_serializes_correctly() {
        let state = DaemonState {
            version: "0.1.0".to_string(),
            pid: 12345,
            started_at: "2026-02-14T10:00:00.000Z".to_string(),
            uptime_seconds: 3600,
            last_updated: "2026-02-14T11:00:00.000Z".to_string(),
            controller_state: "running".to_string(),
            failsafe_reason: None,
            modes: ModesState {
                guard_mode: "enforce".to_string(),
                pdf_mode: "accepting".to_string(),
            },
            last_tick: LastTickState {
                at: Some("2026-02-14T10:59:55.000Z".to_string()),
                signals_applied: 0,
            },
            counters: Counters {
                ticks: 1542,
                signals_applied: 3,
                callback_failures: 0,
                config_drift_ticks: 0,
                dropped_log_events: 0,
            },
            memory_rss_bytes: 48_000_000,
        };
        let json = serde_json::to_string(&state).unwrap();
        let parsed: DaemonState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let parsed: DaemonState = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.pid, 0);
        assert_eq!(parsed.modes.guard_mode, "");
    }

    #[test]
    fn state_round_trips_through_atomic_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut monitor = SelfMonitor::new(path.clone());
        monitor.record_tick(1);
        monitor.maybe_write_state(&ControllerState::Running, "shadow", "accepting", 0);

        let state = SelfMonitor::read_state(&path).unwrap();
        assert_eq!(state.controller_state, "running");
        assert_eq!(state.modes.guard_mode, "shadow");
        assert_eq!(state.counters.ticks, 1);
    }

    #[test]
    fn failsafe_state_carries_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut monitor = SelfMonitor::new(path.clone());
        monitor.maybe_write_state(
            &ControllerState::Failsafe {
                reason: "boom".to_string(),
            },
            "enforce",
            "accepting",
            0,
        );
        let state = SelfMonitor::read_state(&path).unwrap();
        assert_eq!(state.controller_state, "failsafe");
        assert_eq!(state.failsafe_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn second_write_within_interval_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut monitor = SelfMonitor::new(path.clone());
        monitor.maybe_write_state(&ControllerState::Running, "enforce", "accepting", 0);
        let written = fs::metadata(&path).unwrap().modified().unwrap();
        monitor.maybe_write_state(&ControllerState::Running, "enforce", "accepting", 0);
        let written_again = fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(written, written_again);
    }

    #[test]
    fn sync_fault_counters_sets_totals_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut monitor = SelfMonitor::new(path);
        monitor.sync_fault_counters(3, 5);
        assert_eq!(monitor.callback_failures_total, 3);
        assert_eq!(monitor.config_drift_ticks_total, 5);
        // Syncing again overwrites rather than accumulates.
        monitor.sync_fault_counters(3, 5);
        assert_eq!(monitor.callback_failures_total, 3);
        assert_eq!(monitor.config_drift_ticks_total, 5);
    }

    #[test]
    fn heartbeat_reports_running_when_fresh() {
        let hb = ThreadHeartbeat::new("tick");
        assert!(hb.status(Duration::from_secs(60)).is_healthy());
    }

    #[test]
    fn heartbeat_reports_stalled_when_threshold_exceeded() {
        let hb = ThreadHeartbeat::new("tick");
        std::thread::sleep(Duration::from_millis(5));
        assert!(!hb.status(Duration::from_millis(1)).is_healthy());
    }
}

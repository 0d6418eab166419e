//! Structured audit log: append-only JSONL for every applied transition and
//! every allowlist/budget-config update (§10).
//!
//! Four-level degradation chain (primary path → fallback path → stderr →
//! silent discard), numbered rotation, periodic fsync. A sink that cannot
//! persist an event degrades internally rather than propagating a failure
//! into the tick path — nothing observable may ever cause a tick to fail
//! because logging failed.

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::control::controller::EventSink;
use crate::control::model::ControlDecisionEvent;
use crate::core::config::{AllowlistUpdateAudit, BudgetConfigUpdateAudit};
use crate::core::errors::{AcpError, Result};

/// 10 MiB default rotation threshold (§10).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024;
/// Five rotated generations kept by default (§10).
pub const DEFAULT_MAX_ROTATED_FILES: u32 = 5;

/// Degradation state of the event log writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    /// Writing to the primary path.
    Normal,
    /// Primary failed; writing to the fallback path.
    Fallback,
    /// Both files failed; writing to stderr.
    Stderr,
    /// Everything failed; silently discarding.
    Discard,
}

/// Configuration for the event log writer.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Primary log file path.
    pub path: PathBuf,
    /// Optional fallback path (e.g. a tmpfs mount), used when the primary
    /// cannot be opened or a write to it fails.
    pub fallback_path: Option<PathBuf>,
    /// Maximum file size before rotation, bytes. Default 10 MiB.
    pub max_size_bytes: u64,
    /// Number of rotated generations kept. Default 5.
    pub max_rotated_files: u32,
    /// Seconds between forced fsync calls.
    pub fsync_interval_secs: u64,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/adaptive-control/events.jsonl"),
            fallback_path: Some(PathBuf::from("/tmp/adaptive-control-events.jsonl")),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_rotated_files: DEFAULT_MAX_ROTATED_FILES,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only JSONL audit log with rotation and multi-level fallback.
///
/// Implements [`EventSink`] for [`ControlDecisionEvent`]; allowlist and
/// budget-config audits are written via [`Self::log_allowlist_update`] /
/// [`Self::log_budget_config_update`] since those originate outside the tick
/// path and never go through `apply_signal`.
pub struct EventLogWriter {
    config: EventLogConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: SystemTime,
}

impl EventLogWriter {
    /// Open the event log. Falls through the degradation chain on failure;
    /// never panics, never returns an error (§7 "zero-side-effect on
    /// insufficient telemetry" extends to "never block startup on logging").
    #[must_use]
    pub fn open(config: EventLogConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
            last_fsync: SystemTime::now(),
        };
        w.try_open_primary();
        w
    }

    /// Current degradation state, for `actl status` reporting.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Bytes written to the current (un-rotated) file.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush buffered writes.
    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Force an fsync, resetting the periodic timer.
    pub fn fsync(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
            let _ = w.get_ref().sync_data();
            self.last_fsync = SystemTime::now();
        }
    }

    /// Attempt to recover to the primary path. Call periodically while
    /// degraded; a no-op once already `Normal`.
    pub fn try_recover(&mut self) {
        if self.state == WriterState::Normal {
            return;
        }
        if let Ok((file, size)) = open_append(&self.config.path) {
            self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
            self.state = WriterState::Normal;
            self.bytes_written = size;
        }
    }

    /// Write one allowlist-update audit record as a JSONL line.
    pub fn log_allowlist_update(&mut self, audit: &AllowlistUpdateAudit) {
        self.write_json(audit);
    }

    /// Write one budget-config-update audit record as a JSONL line.
    pub fn log_budget_config_update(&mut self, audit: &BudgetConfigUpdateAudit) {
        self.write_json(audit);
    }

    fn write_json<T: Serialize>(&mut self, value: &T) {
        let line = match serde_json::to_string(value) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[ACP-EVENTLOG] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    fn write_line(&mut self, line: &str) {
        if self.bytes_written + line.len() as u64 > self.config.max_size_bytes
            && matches!(self.state, WriterState::Normal | WriterState::Fallback)
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.write_line(line);
                        return;
                    }
                    self.bytes_written += line.len() as u64;
                    self.maybe_fsync();
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[ACP-EVENTLOG] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn maybe_fsync(&mut self) {
        let elapsed = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO);
        if elapsed.as_secs() >= self.config.fsync_interval_secs {
            self.fsync();
        }
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.state = WriterState::Normal;
                self.bytes_written = size;
            }
            Err(_) => self.try_open_fallback(),
        }
    }

    fn try_open_fallback(&mut self) {
        if let Some(fb) = self.config.fallback_path.clone() {
            match open_append(&fb) {
                Ok((file, size)) => {
                    let _ = writeln!(
                        io::stderr(),
                        "[ACP-EVENTLOG] primary path failed, using fallback: {}",
                        fb.display()
                    );
                    self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                    self.state = WriterState::Fallback;
                    self.bytes_written = size;
                }
                Err(_) => {
                    self.state = WriterState::Stderr;
                    let _ = writeln!(
                        io::stderr(),
                        "[ACP-EVENTLOG] both primary and fallback paths failed, using stderr"
                    );
                }
            }
        } else {
            self.state = WriterState::Stderr;
            let _ = writeln!(
                io::stderr(),
                "[ACP-EVENTLOG] primary path failed and no fallback configured, using stderr"
            );
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.state {
            WriterState::Normal => self.try_open_fallback(),
            WriterState::Fallback => {
                self.state = WriterState::Stderr;
                let _ = writeln!(io::stderr(), "[ACP-EVENTLOG] fallback write failed, using stderr");
            }
            WriterState::Stderr => self.state = WriterState::Discard,
            WriterState::Discard => {}
        }
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;

        let base = match self.state {
            WriterState::Normal => self.config.path.clone(),
            WriterState::Fallback => match self.config.fallback_path.clone() {
                Some(p) => p,
                None => return,
            },
            _ => return,
        };

        for i in (1..self.config.max_rotated_files).rev() {
            let from = rotated_name(&base, i);
            let to = rotated_name(&base, i + 1);
            let _ = rename(&from, &to);
        }
        let oldest = rotated_name(&base, self.config.max_rotated_files);
        let _ = fs::remove_file(&oldest);
        let _ = rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(64 * 1024, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl EventSink for EventLogWriter {
    fn emit(&mut self, event: ControlDecisionEvent) {
        self.write_json(&event);
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| AcpError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| AcpError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::model::{ControlSignal, Priority, SignalType};
    use uuid::Uuid;

    fn signal() -> ControlSignal {
        ControlSignal {
            signal_type: SignalType::SwitchToShadow,
            subsystem_id: "guard".to_string(),
            metric_name: "p95_latency_seconds".to_string(),
            tenant_id: "*".to_string(),
            trigger_value: 0.8,
            threshold: 0.5,
            priority: Priority::AdaptiveControl,
            correlation_id: Uuid::new_v4(),
            timestamp_ms: 1_000,
        }
    }

    #[test]
    fn emit_writes_one_jsonl_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let config = EventLogConfig {
            path: path.clone(),
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        };
        let mut writer = EventLogWriter::open(config);

        let event = ControlDecisionEvent::from_signal(&signal(), "enforce", "shadow", None, Uuid::new_v4());
        writer.emit(event);
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["reason"], "SWITCH_TO_SHADOW");
        assert_eq!(parsed["subsystem_id"], "guard");
    }

    #[test]
    fn burn_rate_omitted_when_not_budget_triggered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut writer = EventLogWriter::open(EventLogConfig {
            path: path.clone(),
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        });
        writer.emit(ControlDecisionEvent::from_signal(
            &signal(),
            "enforce",
            "shadow",
            None,
            Uuid::new_v4(),
        ));
        writer.flush();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("burn_rate"));
    }

    #[test]
    fn fallback_used_when_primary_directory_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let bad_primary = PathBuf::from("/nonexistent_acp_test_dir_98765/primary.jsonl");
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = EventLogWriter::open(EventLogConfig {
            path: bad_primary,
            fallback_path: Some(fallback.clone()),
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        });
        assert_eq!(writer.state(), "fallback");
        writer.emit(ControlDecisionEvent::from_signal(
            &signal(),
            "enforce",
            "shadow",
            None,
            Uuid::new_v4(),
        ));
        writer.flush();
        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn rotation_shifts_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut writer = EventLogWriter::open(EventLogConfig {
            path: path.clone(),
            fallback_path: None,
            max_size_bytes: 80,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        });
        for _ in 0..10 {
            writer.emit(ControlDecisionEvent::from_signal(
                &signal(),
                "enforce",
                "shadow",
                None,
                Uuid::new_v4(),
            ));
        }
        writer.flush();
        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
    }

    #[test]
    fn allowlist_and_budget_audits_are_written_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audits.jsonl");
        let mut writer = EventLogWriter::open(EventLogConfig {
            path: path.clone(),
            fallback_path: None,
            max_size_bytes: 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        });
        writer.log_allowlist_update(&AllowlistUpdateAudit {
            action: "allowlist_update",
            old_entries: Vec::new(),
            new_entries: Vec::new(),
            actor: "operator@example.com".to_string(),
            timestamp_ms: 1_000,
        });
        writer.log_budget_config_update(&BudgetConfigUpdateAudit {
            action: "budget_config_update",
            old_version: 1,
            new_version: 2,
            actor: "operator@example.com".to_string(),
            config_count: 2,
        });
        writer.flush();
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("allowlist_update"));
        assert!(lines[1].contains("budget_config_update"));
    }
}

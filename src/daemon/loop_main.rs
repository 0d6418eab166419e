//! Main scheduler loop: sleep → tick → report, single-threaded (§14).
//!
//! The control plane's tick is cheap and side-effect-bounded (§4.6), so one
//! thread owns the whole cycle: it sleeps for the configured loop interval,
//! calls [`AdaptiveController::tick`], writes the state file, sends the
//! systemd watchdog heartbeat, and polls for shutdown/reload signals between
//! iterations.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use std::path::PathBuf;

use crate::control::controller::AdaptiveController;
use crate::core::config::AdaptiveControlConfig;
use crate::daemon::self_monitor::{SelfMonitor, ThreadHeartbeat};
use crate::daemon::signals::{SignalHandler, WatchdogHeartbeat};

/// Drives the tick loop until shutdown is requested.
pub struct Scheduler {
    controller: AdaptiveController,
    monitor: SelfMonitor,
    signals: SignalHandler,
    watchdog: WatchdogHeartbeat,
    heartbeat: Arc<ThreadHeartbeat>,
    loop_interval: Duration,
    /// File a SIGHUP should reload config from. `None` disables reload
    /// (config is fixed for the process lifetime).
    config_path: Option<PathBuf>,
}

impl Scheduler {
    /// Build a scheduler from a wired controller, a self-monitor writing to
    /// the given state file, and the process's signal handler.
    #[must_use]
    pub fn new(
        controller: AdaptiveController,
        monitor: SelfMonitor,
        signals: SignalHandler,
        watchdog: WatchdogHeartbeat,
        loop_interval: Duration,
    ) -> Self {
        Self {
            controller,
            monitor,
            signals,
            watchdog,
            heartbeat: ThreadHeartbeat::new("tick"),
            loop_interval,
            config_path: None,
        }
    }

    /// Enable SIGHUP-driven config reload: `run` will re-read `path` and call
    /// [`AdaptiveController::reload_config`] whenever
    /// [`SignalHandler::should_reload`] fires.
    #[must_use]
    pub fn with_reload_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Heartbeat tracker for external health reporting.
    #[must_use]
    pub fn heartbeat(&self) -> Arc<ThreadHeartbeat> {
        Arc::clone(&self.heartbeat)
    }

    /// Run one iteration: tick, record counters, write state, heartbeat.
    /// Exposed separately from [`Self::run`] so tests can drive iterations
    /// without sleeping.
    pub fn run_once(&mut self, now_ms: i64) {
        let applied = self.controller.tick(now_ms);
        self.heartbeat.beat();
        self.monitor.record_tick(applied.len());
        self.monitor.sync_fault_counters(
            self.controller.callback_failure_count(),
            self.controller.config_drift_tick_count(),
        );

        let modes = self.controller.modes();
        self.monitor.maybe_write_state(self.controller.state(), &modes.guard_mode, &modes.pdf_mode, 0);

        let status = self
            .monitor
            .status_line(self.controller.state(), &modes.guard_mode, &modes.pdf_mode);
        self.watchdog.maybe_notify(&status);
    }

    /// Run the loop until SIGTERM/SIGINT. Returns once shutdown is requested.
    ///
    /// When [`Self::with_reload_path`] was used, a SIGHUP re-reads that file
    /// (applying the same env-override/validation pass as startup) and calls
    /// [`AdaptiveController::reload_config`] — a reload, not a restart: the
    /// controller keeps its tracked modes, hysteresis history, and metrics.
    pub fn run(&mut self) {
        loop {
            if self.signals.should_shutdown() {
                return;
            }
            if self.signals.should_reload() {
                self.reload_config();
            }
            let now_ms = wall_clock_ms();
            self.run_once(now_ms);

            let start = Instant::now();
            while start.elapsed() < self.loop_interval {
                if self.signals.should_shutdown() {
                    return;
                }
                thread::sleep(Duration::from_millis(100).min(self.loop_interval));
            }
        }
    }

    fn reload_config(&mut self) {
        let Some(path) = self.config_path.clone() else {
            return;
        };
        let (config, fallback) = AdaptiveControlConfig::load(Some(&path));
        if let Some(err) = fallback {
            eprintln!("[ACP-RELOAD] config reload fell back to defaults: {err}");
        }
        self.controller.reload_config(config);
        eprintln!("[ACP-RELOAD] config reloaded from {}", path.display());
    }
}

fn wall_clock_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

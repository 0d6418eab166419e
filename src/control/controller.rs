//! `AdaptiveController`: the orchestrator and the crate's only effectful
//! actor (§4.6). Owns lifecycle state, the side-effect boundary
//! (`apply_signal`), and coordinates every pure component each tick.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use crate::control::allowlist::AllowlistManager;
use crate::control::budget::ErrorBudgetCalculator;
use crate::control::decision::{self, DecisionInput, ModeSnapshot, ThresholdPair};
use crate::control::hysteresis::HysteresisFilter;
use crate::control::metrics::MetricsCollector;
use crate::control::model::{
    ControlDecisionEvent, ControlSignal, ControllerState, SignalType, SubsystemModes,
};
use crate::control::sufficiency::SufficiencyChecker;
use crate::core::config::AdaptiveControlConfig;
use crate::core::errors::{AcpError, Result};

/// Reducer applied to in-window samples to derive one scalar metric per
/// tick. The queue-depth reducer is left pluggable (§9 open question);
/// `max` is the default, a simple and conservative choice that never
/// under-reports a burst.
pub type Reducer = fn(&[crate::control::model::MetricSample]) -> f64;

/// `max(total_requests)` across in-window samples — the default pdf
/// queue-depth proxy (§9 "Open question — queue depth reducer").
#[must_use]
pub fn max_total_requests(samples: &[crate::control::model::MetricSample]) -> f64 {
    samples
        .iter()
        .map(|s| s.total_requests as f64)
        .fold(0.0, f64::max)
}

/// `max(latency_p99_seconds)` across in-window samples — the guard latency
/// reducer.
#[must_use]
pub fn max_p99_latency(samples: &[crate::control::model::MetricSample]) -> f64 {
    samples
        .iter()
        .map(|s| s.latency_p99_seconds)
        .fold(0.0, f64::max)
}

/// Sink for every `ControlDecisionEvent` the controller emits. The crate
/// ships a JSONL-backed implementation in
/// [`crate::control::event_log::EventLogWriter`]; tests typically use an
/// in-memory `Vec`-backed sink.
pub trait EventSink {
    /// Record one audit event. Must not panic; a sink that cannot persist
    /// the event degrades internally rather than propagating a failure into
    /// the tick path (§7: nothing propagates past `tick`).
    fn emit(&mut self, event: ControlDecisionEvent);
}

impl EventSink for Vec<ControlDecisionEvent> {
    fn emit(&mut self, event: ControlDecisionEvent) {
        self.push(event);
    }
}

/// A fire-and-forget subsystem callback, invoked with a per-call timeout
/// (§5 "per-callback timeout ... default 1s"). `Arc`-wrapped (rather than
/// `Box`) so the timeout guard can clone it onto a worker thread without
/// borrowing the controller for the thread's `'static` lifetime.
pub type ModeCallback = std::sync::Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Pdf backpressure callback: `true` activates backpressure (stop intake).
pub type BackpressureCallback = std::sync::Arc<dyn Fn(bool) -> bool + Send + Sync>;
/// Override predicate: side-effect-free, fast (§6).
pub type OverridePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Orchestrates one tick of the control loop end to end (§4.6).
///
/// The only method that mutates subsystem state is [`Self::apply_signal`],
/// invoked internally from [`Self::tick`] for each hysteresis-surviving
/// signal. Every other method is read-only.
pub struct AdaptiveController {
    config: AdaptiveControlConfig,
    metrics: MetricsCollector,
    allowlist: AllowlistManager,
    budget_calc: ErrorBudgetCalculator,
    hysteresis: HysteresisFilter,
    state: ControllerState,
    modes: SubsystemModes,
    guard_mode_setter: Option<ModeCallback>,
    pdf_backpressure_setter: Option<BackpressureCallback>,
    killswitch_active_fn: OverridePredicate,
    manual_override_active_fn: OverridePredicate,
    callback_timeout: Duration,
    latency_reducer: Reducer,
    queue_reducer: Reducer,
    event_sink: Box<dyn EventSink + Send>,
    applied_signal_count: u64,
    callback_failure_count: u64,
    config_drift_tick_count: u64,
    /// Test-only seam for driving a tick into `FAILSAFE`: if set, invoked
    /// just before the sufficiency check, mirroring the original's "inject
    /// `sufficiency.check` to raise" fault-injection scenario. Always `None`
    /// outside `#[cfg(test)]` builds.
    #[cfg(test)]
    fault_injector: Option<Box<dyn Fn() -> Result<()> + Send + Sync>>,
}

impl AdaptiveController {
    /// Build a controller from a validated config and an event sink. All
    /// callbacks default to no-ops / always-false; wire them via the
    /// `with_*` builders.
    #[must_use]
    pub fn new(
        config: AdaptiveControlConfig,
        metrics: MetricsCollector,
        event_sink: Box<dyn EventSink + Send>,
    ) -> Self {
        let allowlist = AllowlistManager::new(config.targets.clone());
        let budget_calc = ErrorBudgetCalculator::new(budget_configs_from(&config));
        let hysteresis = HysteresisFilter::new(
            (config.dwell_time_seconds * 1000.0).round() as i64,
            (config.cooldown_period_seconds * 1000.0).round() as i64,
            config.oscillation_window,
            config.oscillation_max_transitions,
            &[("guard", "enforce"), ("pdf", "accepting")],
        );
        Self {
            config,
            metrics,
            allowlist,
            budget_calc,
            hysteresis,
            state: ControllerState::Running,
            modes: SubsystemModes::default(),
            guard_mode_setter: None,
            pdf_backpressure_setter: None,
            killswitch_active_fn: Box::new(|_| false),
            manual_override_active_fn: Box::new(|_| false),
            callback_timeout: Duration::from_millis(
                crate::core::config::DEFAULT_CALLBACK_TIMEOUT_MS,
            ),
            latency_reducer: max_p99_latency,
            queue_reducer: max_total_requests,
            event_sink,
            applied_signal_count: 0,
            callback_failure_count: 0,
            config_drift_tick_count: 0,
            #[cfg(test)]
            fault_injector: None,
        }
    }

    /// Install a fault to be raised just before the sufficiency check on the
    /// next (and every subsequent) tick, for exercising the `FAILSAFE` path.
    /// Test-only.
    #[cfg(test)]
    pub(crate) fn inject_fault_for_test(
        &mut self,
        f: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) {
        self.fault_injector = Some(Box::new(f));
    }

    /// Install the guard-mode callback.
    #[must_use]
    pub fn with_guard_mode_setter(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.guard_mode_setter = Some(std::sync::Arc::new(f));
        self
    }

    /// Install the pdf-backpressure callback.
    #[must_use]
    pub fn with_pdf_backpressure_setter(mut self, f: impl Fn(bool) -> bool + Send + Sync + 'static) -> Self {
        self.pdf_backpressure_setter = Some(std::sync::Arc::new(f));
        self
    }

    /// Install the kill-switch override predicate.
    #[must_use]
    pub fn with_killswitch(mut self, f: OverridePredicate) -> Self {
        self.killswitch_active_fn = f;
        self
    }

    /// Install the manual-override predicate.
    #[must_use]
    pub fn with_manual_override(mut self, f: OverridePredicate) -> Self {
        self.manual_override_active_fn = f;
        self
    }

    /// Override the per-callback timeout (default 1s).
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Replace the budget configs in effect (§4.3's only reset path).
    pub fn update_budget_configs(
        &mut self,
        configs: Vec<crate::control::model::ErrorBudgetConfig>,
        actor: impl Into<String>,
    ) {
        self.budget_calc.update_configs(configs, actor);
    }

    /// Replace the allowlist in effect, returning the `allowlist_update`
    /// audit record for the caller to log (§6).
    pub fn update_allowlist(
        &mut self,
        entries: Vec<crate::control::model::AllowlistEntry>,
        actor: impl Into<String>,
        now_ms: i64,
    ) -> crate::core::config::AllowlistUpdateAudit {
        let new_entries = entries.clone();
        let old_entries = self.allowlist.replace(entries);
        crate::core::config::AllowlistUpdateAudit {
            action: "allowlist_update",
            old_entries,
            new_entries,
            actor: actor.into(),
            timestamp_ms: now_ms,
        }
    }

    /// Replace the config snapshot in effect (SIGHUP-driven reload, §14):
    /// rebuilds the allowlist and budget configs from `new_config` and
    /// retunes the hysteresis filter's dwell/cooldown/oscillation
    /// parameters, but preserves every subsystem's tracked mode, its
    /// recorded transition history, and the metrics collector — a config
    /// reload is not a restart (§5 "Configuration is copy-on-write").
    pub fn reload_config(&mut self, new_config: AdaptiveControlConfig) {
        self.allowlist = AllowlistManager::new(new_config.targets.clone());
        self.budget_calc = ErrorBudgetCalculator::new(budget_configs_from(&new_config));
        self.hysteresis.reconfigure(
            (new_config.dwell_time_seconds * 1000.0).round() as i64,
            (new_config.cooldown_period_seconds * 1000.0).round() as i64,
            new_config.oscillation_window,
            new_config.oscillation_max_transitions,
        );
        self.config = new_config;
    }

    /// Direct access to the metrics collector, for ingesting samples.
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Current subsystem mode tracking.
    #[must_use]
    pub fn modes(&self) -> &SubsystemModes {
        &self.modes
    }

    /// Total signals successfully applied over the controller's lifetime.
    #[must_use]
    pub fn applied_signal_count(&self) -> u64 {
        self.applied_signal_count
    }

    /// Total ticks where a selected signal's callback failed or timed out
    /// (the signal was not applied) since this controller was constructed.
    #[must_use]
    pub fn callback_failure_count(&self) -> u64 {
        self.callback_failure_count
    }

    /// Total ticks that were a pure no-op purely because of a detected
    /// config-query drift (step 1 of §4.6), since this controller was
    /// constructed.
    #[must_use]
    pub fn config_drift_tick_count(&self) -> u64 {
        self.config_drift_tick_count
    }

    /// Run one tick. Never panics and never propagates an error past this
    /// boundary (§7): any internal fault — a genuine `Result::Err` from
    /// `tick_inner`, or an unwinding panic from deeper in the call stack —
    /// transitions the controller to `FAILSAFE` and returns an empty list.
    /// Mirrors the original's single outer `try/except Exception`.
    pub fn tick(&mut self, now_ms: i64) -> Vec<ControlSignal> {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.tick_inner(now_ms)
        }));
        match outcome {
            Ok(Ok(applied)) => applied,
            Ok(Err(err)) => {
                self.state = ControllerState::Failsafe {
                    reason: err.to_string(),
                };
                Vec::new()
            }
            Err(panic_payload) => {
                self.state = ControllerState::Failsafe {
                    reason: panic_message(&panic_payload),
                };
                Vec::new()
            }
        }
    }

    fn tick_inner(&mut self, now_ms: i64) -> Result<Vec<ControlSignal>> {
        // Step 1: config drift gate (§4.6.1). Drift makes the tick a pure
        // no-op — unlike an internal fault it does not move the controller
        // to FAILSAFE, since the last-known-good config and subsystem modes
        // are still valid; it simply withholds new decisions until the
        // drift is reconciled (§7).
        if self.config.check_config_drift().is_some() {
            self.config_drift_tick_count += 1;
            return Ok(Vec::new());
        }

        // Step 2: fetch samples and health for this window.
        let window_start_ms = now_ms - self.config.loop_interval_ms();
        let samples = self.metrics.get_all_samples(window_start_ms, now_ms);
        let health = self.metrics.check_health(now_ms, self.config.stale_threshold_ms());

        #[cfg(test)]
        if let Some(fault) = &self.fault_injector {
            fault()?;
        }

        // Step 3: sufficiency gate.
        let checker = SufficiencyChecker::new(
            self.config.derived_min_samples(),
            self.config.min_bucket_coverage_pct,
            true,
        );
        let sufficiency = checker.check(&samples, &health, window_start_ms, now_ms);
        if !sufficiency.is_sufficient {
            let all_stale = !health.is_empty() && health.iter().all(|h| h.is_stale);
            if all_stale {
                self.state = ControllerState::Suspended;
            }
            return Ok(Vec::new());
        }

        // Step 4: recover from SUSPENDED/FAILSAFE now that sufficiency passed.
        if matches!(self.state, ControllerState::Suspended | ControllerState::Failsafe { .. }) {
            self.state = ControllerState::Running;
        }

        // Step 5: reduce latency/queue-depth.
        let p95_latency = (self.latency_reducer)(&samples);
        let queue_depth = (self.queue_reducer)(&samples);

        // Step 6: evaluate budgets.
        let budgets = self.budget_calc.evaluate(&samples, now_ms);

        // Step 7: decide.
        let killswitch = &self.killswitch_active_fn;
        let manual_override = &self.manual_override_active_fn;
        let input = DecisionInput {
            p95_latency,
            queue_depth,
            guard_latency: ThresholdPair {
                enter: self.config.p95_latency_enter,
                exit: self.config.p95_latency_exit,
            },
            pdf_queue: ThresholdPair {
                enter: self.config.queue_depth_enter as f64,
                exit: self.config.queue_depth_exit as f64,
            },
            budgets: &budgets,
            modes: ModeSnapshot {
                guard_mode: &self.modes.guard_mode,
                pdf_mode: &self.modes.pdf_mode,
            },
            allowlist: &self.allowlist,
            is_killswitch_active: killswitch.as_ref(),
            is_manual_override_active: manual_override.as_ref(),
            now_ms,
        };
        let candidates = decision::decide(&input);

        // Step 8: hysteresis.
        let outcome = self.hysteresis.apply(candidates, now_ms);

        // Step 9: apply each survivor.
        let mut applied = Vec::new();
        for signal in outcome.allowed {
            let burn_rate = budgets
                .iter()
                .find(|b| b.subsystem_id == signal.subsystem_id)
                .filter(|_| signal.metric_name == "burn_rate")
                .map(|b| b.burn_rate);
            if self.apply_signal(&signal, burn_rate) {
                self.hysteresis
                    .record_transition(&signal.subsystem_id, target_mode(signal.signal_type), now_ms);
                self.applied_signal_count += 1;
                applied.push(signal);
            } else {
                self.callback_failure_count += 1;
            }
        }

        Ok(applied)
    }

    /// The only side-effect path (§4.6). Dispatches on signal type, invokes
    /// the matching callback under a timeout, and emits exactly one
    /// `ControlDecisionEvent` per successful application, and never one
    /// speculatively for a signal that was blocked or whose callback failed.
    ///
    /// Returns whether the transition was actually applied; callers must
    /// not record a hysteresis transition or count the signal otherwise.
    fn apply_signal(&mut self, signal: &ControlSignal, burn_rate: Option<f64>) -> bool {
        let previous_mode = match signal.signal_type {
            SignalType::SwitchToShadow | SignalType::RestoreEnforce => self.modes.guard_mode.clone(),
            SignalType::StopAcceptingJobs | SignalType::ResumeAcceptingJobs => {
                self.modes.pdf_mode.clone()
            }
        };
        let new_mode = target_mode(signal.signal_type).to_string();

        let callback_ok = match signal.signal_type {
            SignalType::SwitchToShadow => self.invoke_guard_callback("shadow"),
            SignalType::RestoreEnforce => self.invoke_guard_callback("enforce"),
            SignalType::StopAcceptingJobs => self.invoke_pdf_callback(true),
            SignalType::ResumeAcceptingJobs => self.invoke_pdf_callback(false),
        };
        if !callback_ok {
            return false;
        }

        match signal.signal_type {
            SignalType::SwitchToShadow | SignalType::RestoreEnforce => {
                self.modes.guard_mode = new_mode.clone();
            }
            SignalType::StopAcceptingJobs | SignalType::ResumeAcceptingJobs => {
                self.modes.pdf_mode = new_mode.clone();
            }
        }

        let event = ControlDecisionEvent::from_signal(
            signal,
            &previous_mode,
            &new_mode,
            burn_rate,
            Uuid::new_v4(),
        );
        self.event_sink.emit(event);
        true
    }

    fn invoke_guard_callback(&self, mode: &'static str) -> bool {
        let Some(setter) = self.guard_mode_setter.clone() else {
            return true;
        };
        run_with_timeout(self.callback_timeout, move |tx| {
            let _ = tx.send(setter(mode));
        })
    }

    fn invoke_pdf_callback(&self, active: bool) -> bool {
        let Some(setter) = self.pdf_backpressure_setter.clone() else {
            return true;
        };
        run_with_timeout(self.callback_timeout, move |tx| {
            let _ = tx.send(setter(active));
        })
    }
}

/// The guard/pdf budget-config pair derived from a config snapshot, shared
/// by [`AdaptiveController::new`] and [`AdaptiveController::reload_config`].
fn budget_configs_from(
    config: &AdaptiveControlConfig,
) -> Vec<crate::control::model::ErrorBudgetConfig> {
    vec![
        crate::control::model::ErrorBudgetConfig {
            subsystem_id: "guard".to_string(),
            metric: "availability".to_string(),
            window_seconds: config.budget_window_seconds,
            slo_target: config.guard_slo_target,
            burn_rate_threshold: config.burn_rate_threshold,
        },
        crate::control::model::ErrorBudgetConfig {
            subsystem_id: "pdf".to_string(),
            metric: "availability".to_string(),
            window_seconds: config.budget_window_seconds,
            slo_target: config.pdf_slo_target,
            burn_rate_threshold: config.burn_rate_threshold,
        },
    ]
}

fn target_mode(signal_type: SignalType) -> &'static str {
    match signal_type {
        SignalType::SwitchToShadow => "shadow",
        SignalType::RestoreEnforce => "enforce",
        SignalType::StopAcceptingJobs => "backpressure",
        SignalType::ResumeAcceptingJobs => "accepting",
    }
}

/// Run a callback-invoking closure on a scoped worker thread, bounded by
/// `timeout`. A timeout is treated identically to a callback exception
/// (§5/§7): the signal is not applied.
///
/// The closure itself is expected to catch panics internally where it
/// wraps a fallible callback; `run_with_timeout` only bounds wall-clock
/// time, it does not re-raise a panicking callback as a success.
fn run_with_timeout<F>(timeout: Duration, f: F) -> bool
where
    F: FnOnce(mpsc::Sender<bool>) + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || f(tx));
    match rx.recv_timeout(timeout) {
        Ok(result) => {
            let _ = handle.join();
            result
        }
        Err(_) => false,
    }
}

/// Extract a human-readable reason from a caught panic payload, for
/// `failsafe_reason`. Panics conventionally carry a `&'static str` or
/// `String`; anything else falls back to a generic message.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal fault: non-string panic payload".to_string()
    }
}

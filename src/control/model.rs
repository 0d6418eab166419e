//! Data model shared across the control plane: telemetry records, signals,
//! audit events, and the bounded per-subsystem hysteresis aggregate.
//!
//! Every type here is either immutable-by-convention (constructed once, never
//! mutated in place) or a small mutable aggregate explicitly called out as
//! such (`HysteresisState`). Favors plain data structs with a thin `impl`
//! rather than builder ceremony.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single timestamped telemetry observation, produced externally by the
/// SLO/metrics evaluator and consumed by [`crate::control::metrics::MetricsCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Wall-clock time the sample was recorded, milliseconds since epoch.
    pub timestamp_ms: i64,
    /// Total requests observed in the sample interval.
    pub total_requests: u64,
    /// Requests that completed successfully in the sample interval.
    pub successful_requests: u64,
    /// p99 latency, seconds.
    pub latency_p99_seconds: f64,
    /// False-positive alert count, when the source tracks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_positive_alerts: Option<u64>,
}

/// Derived per-source staleness status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    /// Identifier of the metric source (producer of `MetricSample`s).
    pub source_id: String,
    /// Timestamp of the last sample seen from this source, if any.
    pub last_sample_ms: Option<i64>,
    /// Whether the source is considered stale (see [`SourceHealth::is_stale`]'s
    /// companion computation in `MetricsCollector::check_health`).
    pub is_stale: bool,
}

/// Immutable `(tenant_id, endpoint_class, subsystem_id)` allowlist triple.
/// Each field defaults to the wildcard `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowlistEntry {
    /// Tenant identifier, or `"*"` for any tenant.
    pub tenant_id: String,
    /// Endpoint class, or `"*"` for any class.
    pub endpoint_class: String,
    /// Subsystem identifier (`"guard"` / `"pdf"`), or `"*"` for any.
    pub subsystem_id: String,
}

impl Default for AllowlistEntry {
    fn default() -> Self {
        Self {
            tenant_id: "*".to_string(),
            endpoint_class: "*".to_string(),
            subsystem_id: "*".to_string(),
        }
    }
}

/// Immutable configuration for one error-budget evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBudgetConfig {
    /// Subsystem this budget tracks (`"guard"` / `"pdf"`).
    pub subsystem_id: String,
    /// Metric name the budget is computed over (e.g. `"availability"`).
    pub metric: String,
    /// Rolling window length, seconds. Default 30 days.
    pub window_seconds: u64,
    /// SLO target in (0, 1].
    pub slo_target: f64,
    /// Burn-rate threshold that flips `is_burn_rate_exceeded`.
    pub burn_rate_threshold: f64,
}

impl ErrorBudgetConfig {
    /// 30 days in seconds — the default rolling window.
    pub const DEFAULT_WINDOW_SECONDS: u64 = 30 * 86_400;
}

/// Result of evaluating one [`ErrorBudgetConfig`] against current telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    /// Echoes the config's subsystem.
    pub subsystem_id: String,
    /// Total allowed error budget over the window (request-equivalents).
    pub budget_total: f64,
    /// Errors consumed from the budget so far.
    pub budget_consumed: f64,
    /// Remaining budget, percent, clamped to `[0, 100]`.
    pub budget_remaining_pct: f64,
    /// Consumed/total ratio; `+inf` when total is zero and errors exist.
    pub burn_rate: f64,
    /// Whether the remaining budget has hit zero.
    pub is_exhausted: bool,
    /// Whether the burn rate exceeds the configured threshold.
    pub is_burn_rate_exceeded: bool,
}

/// The four signal types the core may emit. The set is bounded: no other
/// variant may be added without also updating every invariant that quantifies
/// over `SignalType::ALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    /// Downgrade the guard from `enforce` to `shadow`.
    SwitchToShadow,
    /// Upgrade the guard from `shadow` back to `enforce`.
    RestoreEnforce,
    /// Hard-block new pdf job intake.
    StopAcceptingJobs,
    /// Resume pdf job intake.
    ResumeAcceptingJobs,
}

impl SignalType {
    /// The complete, bounded action set.
    pub const ALL: [Self; 4] = [
        Self::SwitchToShadow,
        Self::RestoreEnforce,
        Self::StopAcceptingJobs,
        Self::ResumeAcceptingJobs,
    ];

    /// Which subsystem this signal type targets.
    #[must_use]
    pub const fn subsystem(self) -> &'static str {
        match self {
            Self::SwitchToShadow | Self::RestoreEnforce => "guard",
            Self::StopAcceptingJobs | Self::ResumeAcceptingJobs => "pdf",
        }
    }

    /// Stable string form, also used as `ControlDecisionEvent.reason`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SwitchToShadow => "SWITCH_TO_SHADOW",
            Self::RestoreEnforce => "RESTORE_ENFORCE",
            Self::StopAcceptingJobs => "STOP_ACCEPTING_JOBS",
            Self::ResumeAcceptingJobs => "RESUME_ACCEPTING_JOBS",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four-level priority ladder. Lower numeric value sorts first (higher
/// priority). Only [`Priority::AdaptiveControl`] is ever attached to a
/// signal the `DecisionEngine` itself emits — `Killswitch` and
/// `ManualOverride` are suppression predicates, never signal sources, and
/// `DefaultConfig` is reserved for a static fallback ladder rung the core
/// does not currently populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Highest priority: hard kill-switch override.
    Killswitch = 1,
    /// Operator-initiated manual override.
    ManualOverride = 2,
    /// The adaptive control loop itself — the only source the core emits.
    AdaptiveControl = 3,
    /// Static configuration default, lowest priority.
    DefaultConfig = 4,
}

/// A single unit of decision output. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlSignal {
    /// Which of the four bounded actions this is.
    pub signal_type: SignalType,
    /// Target subsystem (`"guard"` / `"pdf"`).
    pub subsystem_id: String,
    /// Metric name that triggered the signal.
    pub metric_name: String,
    /// Tenant scope, defaults to `"*"`.
    pub tenant_id: String,
    /// The metric value that crossed the threshold.
    pub trigger_value: f64,
    /// The threshold it crossed.
    pub threshold: f64,
    /// Priority-ladder rung.
    pub priority: Priority,
    /// Shared by every signal produced within one `decide()` call.
    pub correlation_id: Uuid,
    /// Wall-clock time the signal was produced, milliseconds since epoch.
    pub timestamp_ms: i64,
}

/// Structured audit record emitted for every transition `apply_signal`
/// actually applies. Never emitted speculatively.
#[derive(Debug, Clone, Serialize)]
pub struct ControlDecisionEvent {
    /// Unique identifier for this event.
    pub event_id: Uuid,
    /// Correlation id of the `decide()` call that produced the signal.
    pub correlation_id: Uuid,
    /// The signal type's string form (e.g. `"SWITCH_TO_SHADOW"`).
    pub reason: String,
    /// Mode the subsystem was in before the transition.
    pub previous_mode: String,
    /// Mode the subsystem is in after the transition.
    pub new_mode: String,
    /// Subsystem the transition applies to.
    pub subsystem_id: String,
    /// Wall-clock time of the transition, milliseconds since epoch.
    pub transition_timestamp_ms: i64,
    /// Metric that triggered the transition.
    pub trigger_metric: String,
    /// Trigger value at the time of the transition.
    pub trigger_value: f64,
    /// Threshold crossed.
    pub threshold: f64,
    /// Burn rate, populated only when the trigger was a budget evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burn_rate: Option<f64>,
    /// Constant `"adaptive_control"`.
    pub actor: &'static str,
}

impl ControlDecisionEvent {
    /// Canonical actor string for every event this core emits.
    pub const ACTOR: &'static str = "adaptive_control";

    /// Build an event from an applied signal and the mode transition it caused.
    #[must_use]
    pub fn from_signal(
        signal: &ControlSignal,
        previous_mode: &str,
        new_mode: &str,
        burn_rate: Option<f64>,
        event_id: Uuid,
    ) -> Self {
        Self {
            event_id,
            correlation_id: signal.correlation_id,
            reason: signal.signal_type.as_str().to_string(),
            previous_mode: previous_mode.to_string(),
            new_mode: new_mode.to_string(),
            subsystem_id: signal.subsystem_id.clone(),
            transition_timestamp_ms: signal.timestamp_ms,
            trigger_metric: signal.metric_name.clone(),
            trigger_value: signal.trigger_value,
            threshold: signal.threshold,
            burn_rate,
            actor: Self::ACTOR,
        }
    }
}

/// Mutable per-subsystem hysteresis aggregate: last transition/signal times
/// plus a bounded FIFO of recent transition timestamps for oscillation
/// detection. Only ever touched from the tick thread (§5: "no external lock
/// needed").
#[derive(Debug, Clone)]
pub struct HysteresisState {
    /// Wall-clock time of the last *applied* transition, if any.
    pub last_transition_ms: Option<i64>,
    /// Wall-clock time of the last signal recorded (applied), if any.
    pub last_signal_ms: Option<i64>,
    /// Current mode string tracked for this subsystem (`"enforce"` /
    /// `"shadow"` / `"accepting"` / `"backpressure"`).
    pub current_mode: String,
    /// Bounded FIFO of applied-transition timestamps, trimmed to the
    /// configured oscillation window size.
    pub transition_history: VecDeque<i64>,
}

impl HysteresisState {
    /// A fresh state seeded with the subsystem's initial mode.
    #[must_use]
    pub fn new(initial_mode: impl Into<String>) -> Self {
        Self {
            last_transition_ms: None,
            last_signal_ms: None,
            current_mode: initial_mode.into(),
            transition_history: VecDeque::new(),
        }
    }
}

/// Lifecycle state of the [`crate::control::controller::AdaptiveController`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    /// Normal operation.
    Running,
    /// All metric sources are stale; subsystem modes preserved, no callbacks.
    Suspended,
    /// A tick raised an unhandled fault; subsystem modes preserved, no callbacks.
    Failsafe {
        /// Human-readable cause, propagated from the triggering fault.
        reason: String,
    },
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Suspended => write!(f, "SUSPENDED"),
            Self::Failsafe { reason } => write!(f, "FAILSAFE ({reason})"),
        }
    }
}

/// The two subsystems' current mode tracking, owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubsystemModes {
    /// `"enforce"` or `"shadow"`.
    pub guard_mode: String,
    /// `"accepting"` or `"backpressure"`.
    pub pdf_mode: String,
}

impl Default for SubsystemModes {
    fn default() -> Self {
        Self {
            guard_mode: "enforce".to_string(),
            pdf_mode: "accepting".to_string(),
        }
    }
}

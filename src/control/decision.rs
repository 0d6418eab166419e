//! Pure decision engine: metrics + budgets + modes + overrides → ordered
//! `ControlSignal` list.
//!
//! No side effects, no clock reads, no I/O. Given identical inputs this
//! produces byte-identical output — the only non-deterministic field,
//! `correlation_id`, is generated once per call and shared by every signal
//! it emits, never compared across calls.

use uuid::Uuid;

use crate::control::allowlist::AllowlistManager;
use crate::control::model::{BudgetStatus, ControlSignal, Priority, SignalType};

/// Current mode tracking the engine reasons about. Read-only snapshot;
/// the engine never mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSnapshot<'a> {
    /// `"enforce"` or `"shadow"`.
    pub guard_mode: &'a str,
    /// `"accepting"` or `"backpressure"`.
    pub pdf_mode: &'a str,
}

/// Threshold pair for a latched enter/exit metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPair {
    /// Crossing this (from below) requests the more restrictive posture.
    pub enter: f64,
    /// Crossing this (from above) requests the less restrictive posture.
    pub exit: f64,
}

/// Everything `decide` needs, gathered into one immutable snapshot so the
/// call site (the controller) owns every side-effecting lookup.
pub struct DecisionInput<'a> {
    /// Reduced p95 latency observed this tick.
    pub p95_latency: f64,
    /// Reduced queue depth observed this tick.
    pub queue_depth: f64,
    /// Guard latency enter/exit pair. `exit < enter` is an invariant,
    /// enforced at config validation, not re-checked here.
    pub guard_latency: ThresholdPair,
    /// Pdf queue-depth enter/exit pair.
    pub pdf_queue: ThresholdPair,
    /// Evaluated budgets for this tick.
    pub budgets: &'a [BudgetStatus],
    /// Current subsystem modes.
    pub modes: ModeSnapshot<'a>,
    /// Allowlist gate; an empty allowlist makes every signal impossible.
    pub allowlist: &'a AllowlistManager,
    /// `true` when a kill-switch is active for the given subsystem. Must be
    /// side-effect-free and fast (§6).
    pub is_killswitch_active: &'a dyn Fn(&str) -> bool,
    /// `true` when a manual override is active for the given subsystem.
    pub is_manual_override_active: &'a dyn Fn(&str) -> bool,
    /// Wall-clock time of this decision, milliseconds since epoch.
    pub now_ms: i64,
}

/// Pure function: snapshot of current state → deterministically ordered
/// list of `ControlSignal`s.
#[must_use]
pub fn decide(input: &DecisionInput<'_>) -> Vec<ControlSignal> {
    let correlation_id = Uuid::new_v4();
    let mut signals = Vec::new();

    evaluate_guard_latency(input, correlation_id, &mut signals);
    evaluate_pdf_queue(input, correlation_id, &mut signals);
    evaluate_budgets(input, correlation_id, &mut signals);

    signals.sort_by(|a, b| {
        (a.priority, &a.subsystem_id, &a.metric_name, &a.tenant_id).cmp(&(
            b.priority,
            &b.subsystem_id,
            &b.metric_name,
            &b.tenant_id,
        ))
    });
    signals
}

fn suppressed(input: &DecisionInput<'_>, subsystem_id: &str) -> bool {
    (input.is_killswitch_active)(subsystem_id) || (input.is_manual_override_active)(subsystem_id)
}

fn in_scope(input: &DecisionInput<'_>, subsystem_id: &str) -> bool {
    input.allowlist.is_subsystem_in_scope(subsystem_id)
}

fn push_signal(
    signals: &mut Vec<ControlSignal>,
    signal_type: SignalType,
    metric_name: &str,
    trigger_value: f64,
    threshold: f64,
    correlation_id: Uuid,
    now_ms: i64,
) {
    signals.push(ControlSignal {
        signal_type,
        subsystem_id: signal_type.subsystem().to_string(),
        metric_name: metric_name.to_string(),
        tenant_id: "*".to_string(),
        trigger_value,
        threshold,
        priority: Priority::AdaptiveControl,
        correlation_id,
        timestamp_ms: now_ms,
    });
}

/// Guard mode logic: monotonic-safe, enter/exit hysteresis band.
fn evaluate_guard_latency(
    input: &DecisionInput<'_>,
    correlation_id: Uuid,
    signals: &mut Vec<ControlSignal>,
) {
    if suppressed(input, "guard") || !in_scope(input, "guard") {
        return;
    }
    match input.modes.guard_mode {
        "enforce" if input.p95_latency > input.guard_latency.enter => push_signal(
            signals,
            SignalType::SwitchToShadow,
            "p95_latency_seconds",
            input.p95_latency,
            input.guard_latency.enter,
            correlation_id,
            input.now_ms,
        ),
        "shadow" if input.p95_latency < input.guard_latency.exit => push_signal(
            signals,
            SignalType::RestoreEnforce,
            "p95_latency_seconds",
            input.p95_latency,
            input.guard_latency.exit,
            correlation_id,
            input.now_ms,
        ),
        _ => {}
    }
}

/// Pdf mode logic: hard-block intake above the enter threshold, resume below exit.
fn evaluate_pdf_queue(
    input: &DecisionInput<'_>,
    correlation_id: Uuid,
    signals: &mut Vec<ControlSignal>,
) {
    if suppressed(input, "pdf") || !in_scope(input, "pdf") {
        return;
    }
    match input.modes.pdf_mode {
        "accepting" if input.queue_depth > input.pdf_queue.enter => push_signal(
            signals,
            SignalType::StopAcceptingJobs,
            "queue_depth",
            input.queue_depth,
            input.pdf_queue.enter,
            correlation_id,
            input.now_ms,
        ),
        "backpressure" if input.queue_depth < input.pdf_queue.exit => push_signal(
            signals,
            SignalType::ResumeAcceptingJobs,
            "queue_depth",
            input.queue_depth,
            input.pdf_queue.exit,
            correlation_id,
            input.now_ms,
        ),
        _ => {}
    }
}

/// Budget-triggered signals: a protective downgrade only, never an upgrade
/// (§4.4 "otherwise skip — already in protective posture").
fn evaluate_budgets(
    input: &DecisionInput<'_>,
    correlation_id: Uuid,
    signals: &mut Vec<ControlSignal>,
) {
    for budget in input.budgets {
        if !(budget.is_burn_rate_exceeded || budget.is_exhausted) {
            continue;
        }
        if suppressed(input, &budget.subsystem_id) || !in_scope(input, &budget.subsystem_id) {
            continue;
        }
        match (
            budget.subsystem_id.as_str(),
            input.modes.guard_mode,
            input.modes.pdf_mode,
        ) {
            ("guard", "enforce", _) => push_signal(
                signals,
                SignalType::SwitchToShadow,
                "burn_rate",
                budget.burn_rate,
                1.0,
                correlation_id,
                input.now_ms,
            ),
            ("pdf", _, "accepting") => push_signal(
                signals,
                SignalType::StopAcceptingJobs,
                "burn_rate",
                budget.burn_rate,
                1.0,
                correlation_id,
                input.now_ms,
            ),
            _ => {}
        }
    }
}

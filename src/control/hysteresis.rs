//! Dwell-time, cooldown, and oscillation-detection filter applied to
//! candidate signals before the controller is allowed to apply them (§4.5).
//!
//! The filter owns one [`crate::control::model::HysteresisState`] per
//! subsystem. It cannot be bypassed by configuration: every
//! candidate signal passes through both the dwell and cooldown checks, with
//! no escape hatch exposed to callers.

use std::collections::HashMap;

use crate::control::model::{ControlSignal, HysteresisState};

/// Per-subsystem dwell/cooldown/oscillation gate.
#[derive(Debug, Clone)]
pub struct HysteresisFilter {
    dwell_time_ms: i64,
    cooldown_ms: i64,
    oscillation_window: usize,
    oscillation_max_transitions: usize,
    states: HashMap<String, HysteresisState>,
}

/// One candidate signal rejected by the filter, for logging (blocked
/// signals are logged but never returned — §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedSignal {
    /// Subsystem the candidate targeted.
    pub subsystem_id: String,
    /// Which gate rejected it.
    pub reason: &'static str,
}

/// Result of running a candidate list through the filter.
#[derive(Debug, Clone, Default)]
pub struct HysteresisOutcome {
    /// Signals that passed both gates, in input order.
    pub allowed: Vec<ControlSignal>,
    /// Signals rejected, with the gate that rejected them.
    pub blocked: Vec<BlockedSignal>,
}

impl HysteresisFilter {
    /// Build a filter seeded with each subsystem's initial mode, so the
    /// first-ever transition for a subsystem is unconstrained (no prior
    /// `last_transition_ms`).
    #[must_use]
    pub fn new(
        dwell_time_ms: i64,
        cooldown_ms: i64,
        oscillation_window: usize,
        oscillation_max_transitions: usize,
        initial_modes: &[(&str, &str)],
    ) -> Self {
        let states = initial_modes
            .iter()
            .map(|(subsystem, mode)| ((*subsystem).to_string(), HysteresisState::new(*mode)))
            .collect();
        Self {
            dwell_time_ms,
            cooldown_ms,
            oscillation_window,
            oscillation_max_transitions,
            states,
        }
    }

    /// Evaluate every candidate signal against its subsystem's dwell and
    /// cooldown gates. Returns both the survivors and a log of rejections.
    #[must_use]
    pub fn apply(&self, candidates: Vec<ControlSignal>, now_ms: i64) -> HysteresisOutcome {
        let mut outcome = HysteresisOutcome::default();
        for signal in candidates {
            let state = self.states.get(&signal.subsystem_id);
            if let Some(reason) = self.reject_reason(state, now_ms) {
                outcome.blocked.push(BlockedSignal {
                    subsystem_id: signal.subsystem_id.clone(),
                    reason,
                });
            } else {
                outcome.allowed.push(signal);
            }
        }
        outcome
    }

    fn reject_reason(&self, state: Option<&HysteresisState>, now_ms: i64) -> Option<&'static str> {
        let Some(state) = state else {
            return None;
        };
        if let Some(last_transition_ms) = state.last_transition_ms {
            if now_ms - last_transition_ms < self.dwell_time_ms {
                return Some("dwell");
            }
        }
        if let Some(last_signal_ms) = state.last_signal_ms {
            if now_ms - last_signal_ms < self.cooldown_ms {
                return Some("cooldown");
            }
        }
        None
    }

    /// Retune dwell/cooldown/oscillation parameters in place (config
    /// reload, §14). Preserves every subsystem's `last_transition_ms`,
    /// `last_signal_ms`, and `current_mode` — only the bound applied to
    /// future candidates changes, plus trimming existing history down to a
    /// newly-shrunk oscillation window.
    pub fn reconfigure(
        &mut self,
        dwell_time_ms: i64,
        cooldown_ms: i64,
        oscillation_window: usize,
        oscillation_max_transitions: usize,
    ) {
        self.dwell_time_ms = dwell_time_ms;
        self.cooldown_ms = cooldown_ms;
        self.oscillation_window = oscillation_window;
        self.oscillation_max_transitions = oscillation_max_transitions;
        for state in self.states.values_mut() {
            while state.transition_history.len() > oscillation_window {
                state.transition_history.pop_front();
            }
        }
    }

    /// Record a successfully applied transition: updates `last_transition_ms`,
    /// `last_signal_ms`, the tracked current mode, and the bounded history
    /// used by [`Self::detect_oscillation`].
    pub fn record_transition(&mut self, subsystem_id: &str, new_mode: &str, now_ms: i64) {
        let state = self
            .states
            .entry(subsystem_id.to_string())
            .or_insert_with(|| HysteresisState::new(new_mode));
        state.last_transition_ms = Some(now_ms);
        state.last_signal_ms = Some(now_ms);
        state.current_mode = new_mode.to_string();
        state.transition_history.push_back(now_ms);
        while state.transition_history.len() > self.oscillation_window {
            state.transition_history.pop_front();
        }
    }

    /// Whether `subsystem_id` has transitioned often enough recently to be
    /// flagged as oscillating. Observational only: the controller still
    /// applies the signal (§4.5 "deliberately keeps the loop self-correcting
    /// rather than self-jamming").
    #[must_use]
    pub fn detect_oscillation(&self, subsystem_id: &str) -> bool {
        self.states
            .get(subsystem_id)
            .is_some_and(|s| s.transition_history.len() >= self.oscillation_max_transitions)
    }

    /// Current tracked mode for a subsystem, if any transition has been
    /// recorded (or it was seeded at construction).
    #[must_use]
    pub fn current_mode(&self, subsystem_id: &str) -> Option<&str> {
        self.states.get(subsystem_id).map(|s| s.current_mode.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::model::{Priority, SignalType};
    use uuid::Uuid;

    fn signal(subsystem_id: &str, signal_type: SignalType, now_ms: i64) -> ControlSignal {
        ControlSignal {
            signal_type,
            subsystem_id: subsystem_id.to_string(),
            metric_name: "p95_latency_seconds".to_string(),
            tenant_id: "*".to_string(),
            trigger_value: 0.8,
            threshold: 0.5,
            priority: Priority::AdaptiveControl,
            correlation_id: Uuid::new_v4(),
            timestamp_ms: now_ms,
        }
    }

    #[test]
    fn first_transition_is_unconstrained() {
        let filter = HysteresisFilter::new(600_000, 300_000, 10, 4, &[("guard", "enforce")]);
        let outcome = filter.apply(vec![signal("guard", SignalType::SwitchToShadow, 0)], 0);
        assert_eq!(outcome.allowed.len(), 1);
        assert!(outcome.blocked.is_empty());
    }

    #[test]
    fn dwell_blocks_transition_before_minimum_elapsed() {
        let mut filter = HysteresisFilter::new(600_000, 300_000, 10, 4, &[("guard", "enforce")]);
        filter.record_transition("guard", "shadow", 0);
        let outcome = filter.apply(vec![signal("guard", SignalType::RestoreEnforce, 500_000)], 500_000);
        assert!(outcome.allowed.is_empty());
        assert_eq!(outcome.blocked[0].reason, "dwell");
    }

    #[test]
    fn dwell_and_cooldown_satisfied_after_sufficient_elapsed() {
        let mut filter = HysteresisFilter::new(600_000, 300_000, 10, 4, &[("guard", "enforce")]);
        filter.record_transition("guard", "shadow", 0);
        let now = 600_001;
        let outcome = filter.apply(vec![signal("guard", SignalType::RestoreEnforce, now)], now);
        assert_eq!(outcome.allowed.len(), 1);
    }

    #[test]
    fn cooldown_measured_from_last_recorded_transition() {
        let mut filter = HysteresisFilter::new(100, 300_000, 10, 4, &[("guard", "enforce")]);
        filter.record_transition("guard", "shadow", 0);
        // Dwell (100ms) satisfied but cooldown (300s) not.
        let outcome = filter.apply(vec![signal("guard", SignalType::RestoreEnforce, 200)], 200);
        assert!(outcome.allowed.is_empty());
        assert_eq!(outcome.blocked[0].reason, "cooldown");
    }

    #[test]
    fn unseeded_subsystem_has_no_prior_state_and_is_unconstrained() {
        let filter = HysteresisFilter::new(600_000, 300_000, 10, 4, &[]);
        let outcome = filter.apply(vec![signal("pdf", SignalType::StopAcceptingJobs, 0)], 0);
        assert_eq!(outcome.allowed.len(), 1);
    }

    #[test]
    fn oscillation_detected_after_enough_transitions_but_not_gating() {
        let mut filter = HysteresisFilter::new(0, 0, 10, 4, &[("guard", "enforce")]);
        for t in [0, 1, 2, 3] {
            filter.record_transition("guard", "shadow", t);
        }
        assert!(filter.detect_oscillation("guard"));
        // Still allowed — oscillation is observational, not gating.
        let outcome = filter.apply(vec![signal("guard", SignalType::SwitchToShadow, 4)], 4);
        assert_eq!(outcome.allowed.len(), 1);
    }

    #[test]
    fn oscillation_not_detected_below_threshold() {
        let mut filter = HysteresisFilter::new(0, 0, 10, 4, &[("guard", "enforce")]);
        filter.record_transition("guard", "shadow", 0);
        assert!(!filter.detect_oscillation("guard"));
    }

    #[test]
    fn history_trimmed_to_oscillation_window() {
        let mut filter = HysteresisFilter::new(0, 0, 3, 10, &[("guard", "enforce")]);
        for t in 0..10 {
            filter.record_transition("guard", "shadow", t);
        }
        let state = filter.states.get("guard").unwrap();
        assert_eq!(state.transition_history.len(), 3);
    }

    #[test]
    fn current_mode_tracks_last_recorded_transition() {
        let mut filter = HysteresisFilter::new(0, 0, 10, 4, &[("guard", "enforce")]);
        assert_eq!(filter.current_mode("guard"), Some("enforce"));
        filter.record_transition("guard", "shadow", 0);
        assert_eq!(filter.current_mode("guard"), Some("shadow"));
    }

    #[test]
    fn reconfigure_preserves_last_transition_and_trims_history() {
        let mut filter = HysteresisFilter::new(600_000, 300_000, 10, 4, &[("guard", "enforce")]);
        for t in [0, 1, 2, 3, 4] {
            filter.record_transition("guard", "shadow", t);
        }
        assert_eq!(filter.current_mode("guard"), Some("shadow"));

        filter.reconfigure(100, 50, 2, 4);
        let state = filter.states.get("guard").unwrap();
        assert_eq!(state.transition_history.len(), 2);
        assert_eq!(state.last_transition_ms, Some(4));

        // New, tighter dwell still gates a too-soon candidate.
        let outcome = filter.apply(vec![signal("guard", SignalType::RestoreEnforce, 10)], 10);
        assert!(outcome.allowed.is_empty());
    }

    #[test]
    fn independent_subsystems_do_not_interfere() {
        let mut filter = HysteresisFilter::new(600_000, 300_000, 10, 4, &[
            ("guard", "enforce"),
            ("pdf", "accepting"),
        ]);
        filter.record_transition("guard", "shadow", 0);
        // pdf has no recorded transition yet: unconstrained.
        let outcome = filter.apply(vec![signal("pdf", SignalType::StopAcceptingJobs, 1)], 1);
        assert_eq!(outcome.allowed.len(), 1);
    }
}

//! Control-plane configuration: typed aggregate, validation, env/TOML loading.
//!
//! A typed struct with a `validate()` pass and a `stable_hash()`
//! fingerprint, covering the `ADAPTIVE_CONTROL_` environment surface and the
//! allowlist/canonical-query fields this domain needs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::control::allowlist::AllowlistEntry;
use crate::core::errors::{AcpError, Result};

/// Environment variable prefix for all control-plane settings.
pub const ENV_PREFIX: &str = "ADAPTIVE_CONTROL_";

/// Canonical guard SLO query string. If the configured value drifts from
/// this, [`AdaptiveControlConfig::check_config_drift`] reports it.
pub const CANONICAL_GUARD_SLO_QUERY: &str =
    "histogram_quantile(0.95, rate(http_request_duration_seconds_bucket[5m]))";

/// Canonical pdf SLO query string.
pub const CANONICAL_PDF_SLO_QUERY: &str =
    "histogram_quantile(0.95, rate(ptf_admin_pdf_render_total_seconds_bucket[5m]))";

/// Default per-callback timeout (milliseconds). Not part of the
/// `ADAPTIVE_CONTROL_` environment surface (§6 does not enumerate it); kept
/// as a compiled-in constant per the "implementations should impose a
/// per-callback timeout (default 1s)" language.
pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 1_000;

/// Validated, immutable control-plane configuration snapshot.
///
/// Replaced atomically on reload (copy-on-write): a tick in progress holds
/// an `Arc`/owned clone for its duration and never observes a partial update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveControlConfig {
    /// Tick cadence, seconds.
    pub loop_interval_seconds: f64,
    /// Guard p95 latency enter threshold, seconds.
    pub p95_latency_enter: f64,
    /// Guard p95 latency exit threshold, seconds. Must be `< enter`.
    pub p95_latency_exit: f64,
    /// Pdf queue-depth enter threshold.
    pub queue_depth_enter: u64,
    /// Pdf queue-depth exit threshold. Must be `< enter`.
    pub queue_depth_exit: u64,
    /// Error-budget rolling window, seconds.
    pub budget_window_seconds: u64,
    /// Guard subsystem SLO target, in (0, 1].
    pub guard_slo_target: f64,
    /// Pdf subsystem SLO target, in (0, 1].
    pub pdf_slo_target: f64,
    /// Burn-rate alert threshold.
    pub burn_rate_threshold: f64,
    /// Minimum time between consecutive applied transitions, seconds.
    pub dwell_time_seconds: f64,
    /// Minimum time before a new signal may be applied, seconds.
    pub cooldown_period_seconds: f64,
    /// Bounded transition-history size used for oscillation detection.
    pub oscillation_window: usize,
    /// Number of transitions within the window that counts as oscillating.
    pub oscillation_max_transitions: usize,
    /// Sufficiency sample-count ratio, in (0, 1].
    pub min_sample_ratio: f64,
    /// Sufficiency minimum bucket coverage, percent, in (0, 100].
    pub min_bucket_coverage_pct: f64,
    /// Tenant/endpoint/subsystem allowlist. Empty means inert.
    pub targets: Vec<AllowlistEntry>,
    /// Configured guard SLO query identifier.
    pub guard_slo_query: String,
    /// Configured pdf SLO query identifier.
    pub pdf_slo_query: String,
}

impl Default for AdaptiveControlConfig {
    fn default() -> Self {
        Self {
            loop_interval_seconds: 30.0,
            p95_latency_enter: 0.5,
            p95_latency_exit: 0.3,
            queue_depth_enter: 50,
            queue_depth_exit: 20,
            budget_window_seconds: 30 * 86_400,
            guard_slo_target: 0.999,
            pdf_slo_target: 0.999,
            burn_rate_threshold: 1.0,
            dwell_time_seconds: 600.0,
            cooldown_period_seconds: 300.0,
            oscillation_window: 10,
            oscillation_max_transitions: 4,
            min_sample_ratio: 0.8,
            min_bucket_coverage_pct: 80.0,
            targets: Vec::new(),
            guard_slo_query: CANONICAL_GUARD_SLO_QUERY.to_string(),
            pdf_slo_query: CANONICAL_PDF_SLO_QUERY.to_string(),
        }
    }
}

impl AdaptiveControlConfig {
    /// Tick cadence in milliseconds.
    #[must_use]
    pub fn loop_interval_ms(&self) -> i64 {
        (self.loop_interval_seconds * 1000.0).round() as i64
    }

    /// Staleness threshold: `2 * control_loop_interval_ms`.
    #[must_use]
    pub fn stale_threshold_ms(&self) -> i64 {
        self.loop_interval_ms() * 2
    }

    /// Sufficiency sample-count floor derived from `min_sample_ratio`.
    ///
    /// Deliberately literal: `max(1, int(min_sample_ratio))` rather than a
    /// "more sensible" ratio against expected samples per window —
    /// `min_sample_ratio` is a fraction in (0, 1], so this floor is always
    /// `1` in practice and the real sufficiency gating comes from bucket
    /// coverage and source staleness. See `DESIGN.md` for the rationale.
    #[must_use]
    pub fn derived_min_samples(&self) -> usize {
        (self.min_sample_ratio as usize).max(1)
    }

    /// Validate every field and cross-field rule. Returns every violation,
    /// not just the first — callers fall back to defaults wholesale on any
    /// non-empty result (§6: "the entire config falls back to defaults, not
    /// partial").
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.loop_interval_seconds <= 0.0 {
            errors.push("loop_interval_seconds must be > 0".to_string());
        }
        if self.p95_latency_enter <= 0.0 {
            errors.push("p95_latency_enter must be > 0".to_string());
        }
        if self.p95_latency_exit <= 0.0 {
            errors.push("p95_latency_exit must be > 0".to_string());
        }
        if self.p95_latency_exit >= self.p95_latency_enter {
            errors.push("p95_latency_exit must be < p95_latency_enter".to_string());
        }
        if self.queue_depth_enter == 0 {
            errors.push("queue_depth_enter must be > 0".to_string());
        }
        if self.queue_depth_exit == 0 {
            errors.push("queue_depth_exit must be > 0".to_string());
        }
        if self.queue_depth_exit >= self.queue_depth_enter {
            errors.push("queue_depth_exit must be < queue_depth_enter".to_string());
        }
        if self.budget_window_seconds == 0 {
            errors.push("budget_window_seconds must be > 0".to_string());
        }
        if !(0.0 < self.guard_slo_target && self.guard_slo_target <= 1.0) {
            errors.push("guard_slo_target must be in (0, 1]".to_string());
        }
        if !(0.0 < self.pdf_slo_target && self.pdf_slo_target <= 1.0) {
            errors.push("pdf_slo_target must be in (0, 1]".to_string());
        }
        if self.burn_rate_threshold <= 0.0 {
            errors.push("burn_rate_threshold must be > 0".to_string());
        }
        if self.dwell_time_seconds <= 0.0 {
            errors.push("dwell_time_seconds must be > 0".to_string());
        }
        if self.cooldown_period_seconds <= 0.0 {
            errors.push("cooldown_period_seconds must be > 0".to_string());
        }
        if self.oscillation_window == 0 {
            errors.push("oscillation_window must be > 0".to_string());
        }
        if self.oscillation_max_transitions == 0 {
            errors.push("oscillation_max_transitions must be > 0".to_string());
        }
        if !(0.0 < self.min_sample_ratio && self.min_sample_ratio <= 1.0) {
            errors.push("min_sample_ratio must be in (0, 1]".to_string());
        }
        if !(0.0 < self.min_bucket_coverage_pct && self.min_bucket_coverage_pct <= 100.0) {
            errors.push("min_bucket_coverage_pct must be in (0, 100]".to_string());
        }

        errors
    }

    /// Compare configured canonical query strings against the embedded
    /// constants. `Some(details)` means the tick loop must no-op until
    /// reconciled.
    #[must_use]
    pub fn check_config_drift(&self) -> Option<String> {
        let mut drifted = Vec::new();
        if self.guard_slo_query != CANONICAL_GUARD_SLO_QUERY {
            drifted.push(format!(
                "guard_slo_query drifted: expected '{CANONICAL_GUARD_SLO_QUERY}', got '{}'",
                self.guard_slo_query
            ));
        }
        if self.pdf_slo_query != CANONICAL_PDF_SLO_QUERY {
            drifted.push(format!(
                "pdf_slo_query drifted: expected '{CANONICAL_PDF_SLO_QUERY}', got '{}'",
                self.pdf_slo_query
            ));
        }
        if drifted.is_empty() {
            None
        } else {
            Some(drifted.join("; "))
        }
    }

    /// Stable FNV-1a fingerprint over every field, for cheap "did the
    /// reloaded config actually change" checks without deep-diffing.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        let mut parts = Vec::new();
        parts.push(format!("loop_interval_seconds={}", self.loop_interval_seconds));
        parts.push(format!("p95_latency_enter={}", self.p95_latency_enter));
        parts.push(format!("p95_latency_exit={}", self.p95_latency_exit));
        parts.push(format!("queue_depth_enter={}", self.queue_depth_enter));
        parts.push(format!("queue_depth_exit={}", self.queue_depth_exit));
        parts.push(format!("budget_window_seconds={}", self.budget_window_seconds));
        parts.push(format!("guard_slo_target={}", self.guard_slo_target));
        parts.push(format!("pdf_slo_target={}", self.pdf_slo_target));
        parts.push(format!("burn_rate_threshold={}", self.burn_rate_threshold));
        parts.push(format!("dwell_time_seconds={}", self.dwell_time_seconds));
        parts.push(format!(
            "cooldown_period_seconds={}",
            self.cooldown_period_seconds
        ));
        parts.push(format!("oscillation_window={}", self.oscillation_window));
        parts.push(format!(
            "oscillation_max_transitions={}",
            self.oscillation_max_transitions
        ));
        parts.push(format!("min_sample_ratio={}", self.min_sample_ratio));
        parts.push(format!(
            "min_bucket_coverage_pct={}",
            self.min_bucket_coverage_pct
        ));
        parts.push(format!("guard_slo_query={}", self.guard_slo_query));
        parts.push(format!("pdf_slo_query={}", self.pdf_slo_query));
        for entry in &self.targets {
            parts.push(format!(
                "target={}|{}|{}",
                entry.tenant_id, entry.endpoint_class, entry.subsystem_id
            ));
        }
        fnv1a_hash(parts.join("\n").as_bytes())
    }

    /// Load from a TOML file (if present) then apply environment overrides,
    /// falling back wholesale to defaults on cross-field validation failure.
    ///
    /// Returns the resulting config and, if a fallback occurred, the
    /// validation error that triggered it.
    pub fn load(toml_path: Option<&Path>) -> (Self, Option<AcpError>) {
        let base = toml_path.map_or_else(Self::default, |path| {
            fs::read_to_string(path)
                .ok()
                .and_then(|raw| toml::from_str::<Self>(&raw).ok())
                .unwrap_or_default()
        });
        let env_lookup = |key: &str| std::env::var(key).ok();
        base.with_env_overrides_from(&env_lookup)
    }

    /// Apply `ADAPTIVE_CONTROL_*` overrides using an injectable key lookup
    /// (instead of `std::env::vars()` directly), so tests can exercise every
    /// fallback branch without mutating process environment.
    #[must_use]
    pub fn with_env_overrides_from(
        &self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> (Self, Option<AcpError>) {
        let mut cfg = self.clone();
        let defaults = Self::default();

        apply_f64(&mut cfg.loop_interval_seconds, defaults.loop_interval_seconds, "LOOP_INTERVAL", lookup);
        apply_f64(&mut cfg.p95_latency_enter, defaults.p95_latency_enter, "P95_LATENCY_ENTER", lookup);
        apply_f64(&mut cfg.p95_latency_exit, defaults.p95_latency_exit, "P95_LATENCY_EXIT", lookup);
        apply_u64(&mut cfg.queue_depth_enter, defaults.queue_depth_enter, "QUEUE_DEPTH_ENTER", lookup);
        apply_u64(&mut cfg.queue_depth_exit, defaults.queue_depth_exit, "QUEUE_DEPTH_EXIT", lookup);
        apply_u64(&mut cfg.budget_window_seconds, defaults.budget_window_seconds, "BUDGET_WINDOW", lookup);
        apply_f64(&mut cfg.guard_slo_target, defaults.guard_slo_target, "GUARD_SLO_TARGET", lookup);
        apply_f64(&mut cfg.pdf_slo_target, defaults.pdf_slo_target, "PDF_SLO_TARGET", lookup);
        apply_f64(&mut cfg.burn_rate_threshold, defaults.burn_rate_threshold, "BURN_RATE_THRESHOLD", lookup);
        apply_f64(&mut cfg.dwell_time_seconds, defaults.dwell_time_seconds, "DWELL_TIME", lookup);
        apply_f64(&mut cfg.cooldown_period_seconds, defaults.cooldown_period_seconds, "COOLDOWN_PERIOD", lookup);
        apply_usize(&mut cfg.oscillation_window, defaults.oscillation_window, "OSCILLATION_WINDOW", lookup);
        apply_usize(
            &mut cfg.oscillation_max_transitions,
            defaults.oscillation_max_transitions,
            "OSCILLATION_MAX_TRANSITIONS",
            lookup,
        );
        apply_f64(&mut cfg.min_sample_ratio, defaults.min_sample_ratio, "MIN_SAMPLE_RATIO", lookup);
        apply_f64(
            &mut cfg.min_bucket_coverage_pct,
            defaults.min_bucket_coverage_pct,
            "MIN_BUCKET_COVERAGE",
            lookup,
        );
        apply_string(&mut cfg.guard_slo_query, "GUARD_SLO_QUERY", lookup);
        apply_string(&mut cfg.pdf_slo_query, "PDF_SLO_QUERY", lookup);

        if let Some(raw) = lookup(&format!("{ENV_PREFIX}TARGETS_JSON")) {
            match serde_json::from_str::<Vec<AllowlistEntry>>(&raw) {
                Ok(targets) => cfg.targets = targets,
                Err(_) => cfg.targets = defaults.targets.clone(),
            }
        }

        let violations = cfg.validate();
        if violations.is_empty() {
            (cfg, None)
        } else {
            let details = violations.join("; ");
            (
                Self::default(),
                Some(AcpError::InvalidConfig { details }),
            )
        }
    }
}

fn apply_f64(field: &mut f64, default: f64, suffix: &str, lookup: &dyn Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(&format!("{ENV_PREFIX}{suffix}")) {
        *field = raw.trim().parse::<f64>().unwrap_or(default);
    }
}

fn apply_u64(field: &mut u64, default: u64, suffix: &str, lookup: &dyn Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(&format!("{ENV_PREFIX}{suffix}")) {
        *field = raw.trim().parse::<u64>().unwrap_or(default);
    }
}

fn apply_usize(field: &mut usize, default: usize, suffix: &str, lookup: &dyn Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(&format!("{ENV_PREFIX}{suffix}")) {
        *field = raw.trim().parse::<usize>().unwrap_or(default);
    }
}

fn apply_string(field: &mut String, suffix: &str, lookup: &dyn Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup(&format!("{ENV_PREFIX}{suffix}")) {
        *field = raw;
    }
}

/// FNV-1a over raw bytes.
fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Audit record emitted by an allowlist replacement.
#[derive(Debug, Clone, Serialize)]
pub struct AllowlistUpdateAudit {
    /// Constant discriminant, `"allowlist_update"`.
    pub action: &'static str,
    /// Previous entries, for diff review.
    pub old_entries: Vec<AllowlistEntry>,
    /// New entries now in effect.
    pub new_entries: Vec<AllowlistEntry>,
    /// Who/what requested the change.
    pub actor: String,
    /// Wall-clock time of the change, milliseconds.
    pub timestamp_ms: i64,
}

/// Audit record emitted by a budget-config version bump.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetConfigUpdateAudit {
    /// Constant discriminant, `"budget_config_update"`.
    pub action: &'static str,
    /// Version before the update.
    pub old_version: u64,
    /// Version after the update.
    pub new_version: u64,
    /// Who/what requested the change.
    pub actor: String,
    /// Number of budget configs now in effect.
    pub config_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let cfg = AdaptiveControlConfig::default();
        assert_eq!(cfg.loop_interval_seconds, 30.0);
        assert_eq!(cfg.p95_latency_enter, 0.5);
        assert_eq!(cfg.p95_latency_exit, 0.3);
        assert_eq!(cfg.queue_depth_enter, 50);
        assert_eq!(cfg.queue_depth_exit, 20);
        assert_eq!(cfg.budget_window_seconds, 2_592_000);
        assert_eq!(cfg.guard_slo_target, 0.999);
        assert_eq!(cfg.pdf_slo_target, 0.999);
        assert_eq!(cfg.burn_rate_threshold, 1.0);
        assert_eq!(cfg.dwell_time_seconds, 600.0);
        assert_eq!(cfg.cooldown_period_seconds, 300.0);
        assert_eq!(cfg.oscillation_window, 10);
        assert_eq!(cfg.oscillation_max_transitions, 4);
        assert_eq!(cfg.min_sample_ratio, 0.8);
        assert_eq!(cfg.min_bucket_coverage_pct, 80.0);
        assert!(cfg.validate().is_empty());
        assert!(cfg.check_config_drift().is_none());
    }

    #[test]
    fn exit_greater_than_enter_fails_validation() {
        let mut cfg = AdaptiveControlConfig::default();
        cfg.p95_latency_exit = cfg.p95_latency_enter;
        let errors = cfg.validate();
        assert!(!errors.is_empty());
        assert!(errors.iter().any(|e| e.contains("p95_latency_exit")));
    }

    #[test]
    fn drift_detected_when_query_diverges() {
        let mut cfg = AdaptiveControlConfig::default();
        cfg.guard_slo_query = "something_else".to_string();
        let drift = cfg.check_config_drift().unwrap();
        assert!(drift.contains("guard_slo_query drifted"));
    }

    #[test]
    fn single_bad_field_falls_back_to_that_fields_default_only() {
        let base = AdaptiveControlConfig::default();
        let mut overrides: BTreeMap<&str, &str> = BTreeMap::new();
        overrides.insert("ADAPTIVE_CONTROL_LOOP_INTERVAL", "not_a_number");
        overrides.insert("ADAPTIVE_CONTROL_BURN_RATE_THRESHOLD", "2.5");
        let lookup = |key: &str| overrides.get(key).map(|v| (*v).to_string());
        let (cfg, err) = base.with_env_overrides_from(&lookup);
        assert!(err.is_none());
        assert_eq!(cfg.loop_interval_seconds, 30.0);
        assert_eq!(cfg.burn_rate_threshold, 2.5);
    }

    #[test]
    fn cross_field_violation_falls_back_entirely_to_defaults() {
        let base = AdaptiveControlConfig::default();
        let mut overrides: BTreeMap<&str, &str> = BTreeMap::new();
        overrides.insert("ADAPTIVE_CONTROL_P95_LATENCY_ENTER", "0.1");
        overrides.insert("ADAPTIVE_CONTROL_P95_LATENCY_EXIT", "0.3");
        overrides.insert("ADAPTIVE_CONTROL_BURN_RATE_THRESHOLD", "9.0");
        let lookup = |key: &str| overrides.get(key).map(|v| (*v).to_string());
        let (cfg, err) = base.with_env_overrides_from(&lookup);
        assert!(err.is_some());
        assert_eq!(cfg, AdaptiveControlConfig::default());
        assert_eq!(cfg.burn_rate_threshold, 1.0);
    }

    #[test]
    fn targets_json_parses_into_allowlist_entries() {
        let base = AdaptiveControlConfig::default();
        let mut overrides: BTreeMap<&str, &str> = BTreeMap::new();
        overrides.insert(
            "ADAPTIVE_CONTROL_TARGETS_JSON",
            r#"[{"tenant_id":"acme","endpoint_class":"*","subsystem_id":"guard"}]"#,
        );
        let lookup = |key: &str| overrides.get(key).map(|v| (*v).to_string());
        let (cfg, err) = base.with_env_overrides_from(&lookup);
        assert!(err.is_none());
        assert_eq!(cfg.targets.len(), 1);
        assert_eq!(cfg.targets[0].tenant_id, "acme");
    }

    #[test]
    fn invalid_targets_json_degrades_to_empty() {
        let base = AdaptiveControlConfig::default();
        let mut overrides: BTreeMap<&str, &str> = BTreeMap::new();
        overrides.insert("ADAPTIVE_CONTROL_TARGETS_JSON", "not json");
        let lookup = |key: &str| overrides.get(key).map(|v| (*v).to_string());
        let (cfg, err) = base.with_env_overrides_from(&lookup);
        assert!(err.is_none());
        assert!(cfg.targets.is_empty());
    }

    #[test]
    fn stable_hash_is_deterministic_and_sensitive_to_changes() {
        let a = AdaptiveControlConfig::default();
        let b = AdaptiveControlConfig::default();
        assert_eq!(a.stable_hash(), b.stable_hash());

        let mut c = AdaptiveControlConfig::default();
        c.burn_rate_threshold = 2.0;
        assert_ne!(a.stable_hash(), c.stable_hash());
    }

    #[test]
    fn derived_min_samples_matches_original_wiring_formula() {
        let cfg = AdaptiveControlConfig::default();
        assert_eq!(cfg.derived_min_samples(), 1);
    }
}

//! Rolling-window error-budget accounting.
//!
//! The only way to reset a budget is an explicit `update_configs` call that
//! bumps the version and produces an audit record — organic sample aging
//! through the rolling window is not a reset, it is the window simply
//! advancing.

use crate::control::model::{BudgetStatus, ErrorBudgetConfig, MetricSample};
use crate::core::config::BudgetConfigUpdateAudit;

/// Evaluates a set of [`ErrorBudgetConfig`]s against current telemetry.
#[derive(Debug, Clone)]
pub struct ErrorBudgetCalculator {
    configs: Vec<ErrorBudgetConfig>,
    version: u64,
}

impl ErrorBudgetCalculator {
    /// Build a calculator from an initial config set (version 1).
    #[must_use]
    pub fn new(configs: Vec<ErrorBudgetConfig>) -> Self {
        Self { configs, version: 1 }
    }

    /// Current config-version stamp.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The configs currently in effect.
    #[must_use]
    pub fn configs(&self) -> &[ErrorBudgetConfig] {
        &self.configs
    }

    /// Replace the config set, bumping the version and producing an audit
    /// record. This is the only budget "reset" path (§4.3).
    pub fn update_configs(
        &mut self,
        new_configs: Vec<ErrorBudgetConfig>,
        actor: impl Into<String>,
    ) -> BudgetConfigUpdateAudit {
        let old_version = self.version;
        self.version += 1;
        let config_count = new_configs.len();
        self.configs = new_configs;
        BudgetConfigUpdateAudit {
            action: "budget_config_update",
            old_version,
            new_version: self.version,
            actor: actor.into(),
            config_count,
        }
    }

    /// Evaluate every configured budget against `samples` as of `now_ms`.
    #[must_use]
    pub fn evaluate(&self, samples: &[MetricSample], now_ms: i64) -> Vec<BudgetStatus> {
        self.configs
            .iter()
            .map(|config| evaluate_one(config, samples, now_ms))
            .collect()
    }
}

fn evaluate_one(config: &ErrorBudgetConfig, samples: &[MetricSample], now_ms: i64) -> BudgetStatus {
    let subsystem_id = config.subsystem_id.clone();
    let window_start_ms = now_ms - i64::try_from(config.window_seconds).unwrap_or(i64::MAX) * 1_000;

    let in_window: Vec<&MetricSample> = samples
        .iter()
        .filter(|s| s.timestamp_ms >= window_start_ms && s.timestamp_ms <= now_ms)
        .collect();

    let total_requests: u64 = in_window.iter().map(|s| s.total_requests).sum();
    let total_errors: u64 = in_window
        .iter()
        .map(|s| s.total_requests.saturating_sub(s.successful_requests))
        .sum();

    if total_requests == 0 {
        return BudgetStatus {
            subsystem_id,
            budget_total: 0.0,
            budget_consumed: 0.0,
            budget_remaining_pct: 100.0,
            burn_rate: 0.0,
            is_exhausted: false,
            is_burn_rate_exceeded: false,
        };
    }

    let window_f = config.window_seconds as f64;
    let request_rate = total_requests as f64 / window_f;
    let budget_total = (1.0 - config.slo_target) * window_f * request_rate;
    let budget_consumed = total_errors as f64;

    let budget_remaining_pct = if budget_total > 0.0 {
        (1.0 - budget_consumed / budget_total).mul_add(100.0, 0.0).max(0.0)
    } else if budget_consumed > 0.0 {
        0.0
    } else {
        100.0
    };

    let burn_rate = if budget_total > 0.0 {
        budget_consumed / budget_total
    } else if budget_consumed > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    BudgetStatus {
        subsystem_id,
        budget_total,
        budget_consumed,
        budget_remaining_pct,
        burn_rate,
        is_exhausted: budget_remaining_pct <= 0.0,
        is_burn_rate_exceeded: burn_rate > config.burn_rate_threshold,
    }
}

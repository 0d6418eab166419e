//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use adaptive_control_plane::prelude::*;
//! ```

// Core
pub use crate::core::config::AdaptiveControlConfig;
pub use crate::core::errors::{AcpError, Result};

// Control data model
pub use crate::control::model::{
    AllowlistEntry, ControlDecisionEvent, ControlSignal, ControllerState, ErrorBudgetConfig,
    MetricSample, Priority, SignalType, SubsystemModes,
};

// Control components
pub use crate::control::allowlist::AllowlistManager;
pub use crate::control::budget::ErrorBudgetCalculator;
pub use crate::control::controller::{AdaptiveController, EventSink};
pub use crate::control::decision::{self, DecisionInput, ModeSnapshot, ThresholdPair};
pub use crate::control::event_log::{EventLogConfig, EventLogWriter};
pub use crate::control::hysteresis::HysteresisFilter;
pub use crate::control::metrics::MetricsCollector;
pub use crate::control::sufficiency::SufficiencyChecker;

// Daemon
pub use crate::daemon::self_monitor::{DaemonState, SelfMonitor};
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;

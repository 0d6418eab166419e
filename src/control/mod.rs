//! The adaptive control plane: telemetry ingestion, error-budget accounting,
//! pure decisioning, hysteresis, and the effectful orchestrator that applies
//! transitions to the `guard` and `pdf` subsystems.
//!
//! Module boundary mirrors the pure-core/effectful-shell split (§4.6):
//! [`decision`] and [`hysteresis`] never touch the clock or I/O;
//! [`controller`] is the crate's only effectful actor.

pub mod allowlist;
pub mod budget;
pub mod controller;
pub mod decision;
pub mod event_log;
pub mod hysteresis;
pub mod metrics;
pub mod model;
pub mod sufficiency;

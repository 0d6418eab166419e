#![forbid(unsafe_code)]

//! `adaptive_control_plane` — an SLO-aware adaptive control loop that
//! monitors error budgets, latency, and queue depth for two protected
//! subsystems (a request-admission `guard` and a `pdf` job intake) and
//! shifts them toward safer postures under stress, restoring them when
//! load subsides.
//!
//! The crate splits cleanly into a pure core and an effectful shell:
//! - [`control`] holds the telemetry collector, sufficiency gate, error-budget
//!   accounting, the pure [`control::decision`] engine, the
//!   [`control::hysteresis`] filter, the [`control::controller`] orchestrator
//!   (the crate's only effectful actor), and the structured audit log.
//! - [`core`] holds configuration loading/validation and the crate's error
//!   type.
//! - [`daemon`] is the reference scheduler that drives `tick` on a cadence,
//!   handles `SIGTERM`/`SIGINT`/`SIGHUP`, and exposes daemon self-monitoring
//!   state to the CLI.
//!
//! See `DESIGN.md` for the grounding ledger behind each module.

pub mod control;
pub mod core;
pub mod daemon;
pub mod prelude;

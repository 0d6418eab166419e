//! Daemon subsystem: the tick scheduler, self-monitoring state file, and
//! signal handling for the long-running `actl run` process (§14).

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod self_monitor;
#[cfg(feature = "daemon")]
pub mod signals;

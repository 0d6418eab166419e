//! `actl` — operate the adaptive control plane: run the daemon, validate
//! configuration, and inspect daemon status without starting the loop
//! (§14 "A minimal CLI (`run`, `validate-config`, `status`)").

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use adaptive_control_plane::control::controller::AdaptiveController;
use adaptive_control_plane::control::event_log::{EventLogConfig, EventLogWriter};
use adaptive_control_plane::control::metrics::MetricsCollector;
use adaptive_control_plane::core::config::AdaptiveControlConfig;
use adaptive_control_plane::daemon::loop_main::Scheduler;
use adaptive_control_plane::daemon::self_monitor::SelfMonitor;
#[cfg(feature = "daemon")]
use adaptive_control_plane::daemon::signals::{SignalHandler, WatchdogHeartbeat};

/// Default daemon state file, read by `actl status` and written by `actl run`.
const DEFAULT_STATE_FILE: &str = "/var/lib/adaptive-control/state.json";

/// `adaptive_control_plane`'s operator CLI.
#[derive(Debug, Parser)]
#[command(
    name = "actl",
    author,
    version,
    about = "SLO-aware adaptive control plane for guard/pdf protective mode transitions",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Optional TOML config file; `ADAPTIVE_CONTROL_*` env vars still take
    /// precedence over its values (§12).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output.
    #[arg(long, global = true)]
    json: bool,
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the tick scheduler until `SIGTERM`/`SIGINT`.
    Run(RunArgs),
    /// Load and validate configuration, reporting any fallback-to-defaults.
    ValidateConfig,
    /// Report the running daemon's last-known state.
    Status(StatusArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Where the structured event log (`ControlDecisionEvent` JSONL) is written.
    #[arg(long, value_name = "PATH")]
    event_log: Option<PathBuf>,
    /// Where the daemon writes `state.json` for `actl status`.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,
}

#[derive(Debug, clap::Args)]
struct StatusArgs {
    /// State file to read (must match the `--state-file` the daemon was run with).
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,
}

/// Parse arguments and dispatch. Returns a process exit code.
#[must_use]
pub fn run(cli: &Cli) -> i32 {
    match &cli.command {
        Command::Run(args) => cmd_run(cli.config.as_deref(), args),
        Command::ValidateConfig => cmd_validate_config(cli.config.as_deref(), cli.json),
        Command::Status(args) => cmd_status(&args.state_file, cli.json),
    }
}

fn cmd_run(config_path: Option<&Path>, args: &RunArgs) -> i32 {
    let (config, fallback) = AdaptiveControlConfig::load(config_path);
    if let Some(err) = fallback {
        eprintln!(
            "{} configuration fell back to defaults: {err}",
            "warning:".yellow().bold()
        );
    }

    let event_log_path = args
        .event_log
        .clone()
        .unwrap_or_else(|| EventLogConfig::default().path);
    let event_log = EventLogWriter::open(EventLogConfig {
        path: event_log_path,
        ..EventLogConfig::default()
    });

    let metrics = MetricsCollector::new();
    let controller = AdaptiveController::new(config.clone(), metrics, Box::new(event_log));
    let monitor = SelfMonitor::new(args.state_file.clone());

    #[cfg(feature = "daemon")]
    {
        let signals = SignalHandler::new();
        let watchdog = watchdog_from_env();
        let mut scheduler = Scheduler::new(
            controller,
            monitor,
            signals.clone(),
            watchdog,
            Duration::from_secs_f64(config.loop_interval_seconds),
        );
        if let Some(path) = config_path {
            scheduler = scheduler.with_reload_path(path.to_path_buf());
        }
        println!(
            "actl: running, loop_interval={}s, targets={}",
            config.loop_interval_seconds,
            config.targets.len()
        );
        scheduler.run();
        println!("actl: shutdown requested, exiting cleanly");
        0
    }
    #[cfg(not(feature = "daemon"))]
    {
        let _ = (controller, monitor);
        eprintln!("actl: built without the \"daemon\" feature; cannot run the scheduler loop");
        1
    }
}

#[cfg(feature = "daemon")]
fn watchdog_from_env() -> WatchdogHeartbeat {
    let notify_socket_set = std::env::var("NOTIFY_SOCKET").is_ok_and(|s| !s.is_empty());
    let watchdog_usec = std::env::var("WATCHDOG_USEC")
        .ok()
        .and_then(|v| v.parse::<u64>().ok());
    match (notify_socket_set, watchdog_usec) {
        (true, Some(usec)) if usec > 0 => WatchdogHeartbeat::new(usec / 1_000_000),
        _ => WatchdogHeartbeat::disabled(),
    }
}

fn cmd_validate_config(config_path: Option<&Path>, json: bool) -> i32 {
    let (config, fallback) = AdaptiveControlConfig::load(config_path);
    let drift = config.check_config_drift();

    if json {
        let report = serde_json::json!({
            "fell_back_to_defaults": fallback.is_some(),
            "fallback_reason": fallback.as_ref().map(ToString::to_string),
            "config_drift": drift,
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
    } else {
        match &fallback {
            Some(err) => println!("{} {err}", "INVALID (fell back to defaults):".red().bold()),
            None => println!("{}", "VALID".green().bold()),
        }
        if let Some(details) = &drift {
            println!("{} {details}", "config drift:".yellow().bold());
        }
        println!("loop_interval_seconds = {}", config.loop_interval_seconds);
        println!(
            "guard latency enter/exit = {}/{}",
            config.p95_latency_enter, config.p95_latency_exit
        );
        println!(
            "pdf queue enter/exit = {}/{}",
            config.queue_depth_enter, config.queue_depth_exit
        );
        println!("targets = {} entr{}", config.targets.len(), if config.targets.len() == 1 { "y" } else { "ies" });
    }

    i32::from(fallback.is_some() || drift.is_some())
}

fn cmd_status(state_file: &Path, json: bool) -> i32 {
    match SelfMonitor::read_state(state_file) {
        Ok(state) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&state).unwrap_or_default());
            } else {
                let label = match state.controller_state.as_str() {
                    "running" => state.controller_state.green().bold(),
                    "suspended" => state.controller_state.yellow().bold(),
                    _ => state.controller_state.red().bold(),
                };
                println!("state: {label}");
                if let Some(reason) = &state.failsafe_reason {
                    println!("failsafe_reason: {reason}");
                }
                println!("guard_mode: {}", state.modes.guard_mode);
                println!("pdf_mode: {}", state.modes.pdf_mode);
                println!(
                    "ticks={} signals_applied={} callback_failures={}",
                    state.counters.ticks,
                    state.counters.signals_applied,
                    state.counters.callback_failures
                );
                println!("uptime_seconds={}", state.uptime_seconds);
            }
            0
        }
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            1
        }
    }
}

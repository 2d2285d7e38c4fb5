//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Log levels:
//! - ERROR: Failures that abort a command (bad task file, cycle, config)
//! - WARN: Task failures and retries
//! - INFO: Run, batch, and task lifecycle
//! - DEBUG: Graph construction and planning detail
//! - TRACE: Executor plumbing
//!
//! Priority for the filter:
//! 1. `CONDUCTOR_LOG` (any `EnvFilter` directive, e.g. `conductor=trace`)
//! 2. `--debug` flag or `CONDUCTOR_DEBUG=1|true` gives `debug`
//! 3. default to `info`
//!
//! Output goes to stderr; stdout is reserved for JSON results.

use tracing_subscriber::{fmt, EnvFilter};

pub const FILTER_ENV: &str = "CONDUCTOR_LOG";
pub const DEBUG_ENV: &str = "CONDUCTOR_DEBUG";

/// Install the global subscriber. Later calls are no-ops.
pub fn init_with_debug(debug: bool) {
    let filter_env = std::env::var(FILTER_ENV).ok();
    let debug_env = std::env::var(DEBUG_ENV).ok();

    let debug_enabled = debug || env_flag(debug_env.as_deref());

    let directive = filter_directive(debug_enabled, filter_env.as_deref());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn env_flag(value: Option<&str>) -> bool {
    value
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn filter_directive(debug: bool, filter_env: Option<&str>) -> String {
    match filter_env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directive) => directive.to_string(),
        None if debug => "debug".to_string(),
        None => "info".to_string(),
    }
}

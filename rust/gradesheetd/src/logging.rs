//! Logging setup. Stdout carries the IPC protocol, so every log line goes to stderr.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `filter` uses `EnvFilter` directive syntax, for
/// example `info` or `gradesheetd=debug`. An unparseable filter falls back to `info`.
///
/// Fails if a global subscriber is already installed.
pub fn init(filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_ansi(false)
        .try_init()
}

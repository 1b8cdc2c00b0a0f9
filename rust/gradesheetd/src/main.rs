mod calc;
mod config;
mod db;
mod grade;
mod ipc;
mod logging;
mod review;
mod roster;
mod scheme;
mod sheet;
mod store;
mod submission;

use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

fn write_line(out: &mut impl Write, value: &serde_json::Value) -> io::Result<()> {
    let line = serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    writeln!(out, "{}", line)
}

fn main() -> anyhow::Result<()> {
    let cfg = config::DaemonConfig::from_env();
    if let Err(e) = logging::init(&cfg.log_filter) {
        eprintln!("gradesheetd: logging not initialised: {}", e);
    }
    info!(version = env!("CARGO_PKG_VERSION"), "gradesheetd starting");

    let mut state = ipc::AppState::new();
    if let Some(ws) = cfg.workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, ws) {
            // Still serve requests so the client can pick another workspace.
            error!(workspace = %ws.display(), error = %e, "startup workspace failed to open");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!(error = %e, "malformed request line");
                write_line(
                    &mut stdout,
                    &serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    }),
                )?;
                stdout.flush()?;
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        write_line(&mut stdout, &resp)?;
        for event in state.drain_events() {
            write_line(&mut stdout, &event)?;
        }
        stdout.flush()?;
    }

    info!("gradesheetd exiting");
    Ok(())
}

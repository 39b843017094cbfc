//! `proxy status` — exit 0 (healthy), 1 (degraded/unreachable-but-running),
//! or 2 (not running), per §6's CLI exit-code contract.
//!
//! Grounded on `ipc/status.rs`'s read-pid-then-report shape, extended to
//! also probe `GET /health` since this proxy's liveness signal is the HTTP
//! server, not a socket file.

use anyhow::Result;

use crate::ipc::pidfile;

pub enum StatusOutcome {
    Healthy,
    Degraded,
    NotRunning,
}

impl StatusOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            StatusOutcome::Healthy => 0,
            StatusOutcome::Degraded => 1,
            StatusOutcome::NotRunning => 2,
        }
    }
}

pub async fn run(port: u16) -> Result<StatusOutcome> {
    let Some(pid) = pidfile::read_pid() else {
        println!("no daemon running (no PID file at {})", pidfile::pid_path().display());
        return Ok(StatusOutcome::NotRunning);
    };

    if !pidfile::is_alive(pid) {
        println!("daemon not running (stale PID file for PID {pid})");
        pidfile::remove_pid_file();
        return Ok(StatusOutcome::NotRunning);
    }

    let url = format!("http://127.0.0.1:{port}/health");
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            println!(
                "daemon running (PID {pid}): {} healthy of {} servers",
                body.get("healthy_servers").unwrap_or(&serde_json::json!(0)),
                body.get("servers").unwrap_or(&serde_json::json!(0)),
            );
            if body.get("status").and_then(|s| s.as_str()) == Some("ok") {
                Ok(StatusOutcome::Healthy)
            } else {
                Ok(StatusOutcome::Degraded)
            }
        }
        _ => {
            println!("daemon running (PID {pid}) but not responding on port {port}");
            Ok(StatusOutcome::Degraded)
        }
    }
}

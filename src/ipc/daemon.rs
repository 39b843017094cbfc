//! `proxy start --background` — spawn a detached child running the
//! foreground server, write its PID file, and wait for `/health` to answer
//! before returning control to the shell.
//!
//! Grounded on `ipc/proxy.rs`'s `spawn_daemon` (detached child via
//! `std::process::Command`, `Stdio::null()` on stdin/stdout) and
//! `wait_for_socket`'s exponential-backoff poll, adapted from polling a Unix
//! socket to polling `GET /health` since this proxy has no socket to dial.

use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::ipc::pidfile;

pub struct BackgroundArgs {
    pub port: u16,
    pub compose_file: PathBuf,
    pub log_level: String,
}

/// Spawn `proxy start` (foreground) as a detached child, redirecting its
/// stderr (where `tracing` writes) to [`crate::ipc::pidfile::log_path`] for
/// `proxy logs`, then poll `/health` until it answers or `timeout` elapses.
pub async fn spawn(args: BackgroundArgs, timeout: Duration) -> Result<u32> {
    if let Some(pid) = pidfile::read_pid() {
        if pidfile::is_alive(pid) {
            bail!("a daemon is already running (PID {pid})");
        }
        pidfile::remove_pid_file();
    }

    let exe = std::env::current_exe().context("could not determine own executable path")?;
    let log_file = File::create(pidfile::log_path()).context("failed to create log file")?;

    let child = std::process::Command::new(exe)
        .arg("start")
        .arg("--port")
        .arg(args.port.to_string())
        .arg("--config")
        .arg(&args.compose_file)
        .arg("--log-level")
        .arg(&args.log_level)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log_file))
        .spawn()
        .context("failed to spawn daemon process")?;

    let pid = child.id();
    pidfile::write_pid(pid)?;

    wait_for_health(args.port, timeout).await?;
    Ok(pid)
}

async fn wait_for_health(port: u16, timeout: Duration) -> Result<()> {
    let url = format!("http://127.0.0.1:{port}/health");
    let start = std::time::Instant::now();
    let mut delay = Duration::from_millis(50);

    loop {
        if start.elapsed() > timeout {
            bail!("timed out waiting for the daemon to become reachable on port {port}");
        }
        if reqwest::get(&url).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_secs(1));
    }
}

//! `proxy stop` — SIGTERM the daemon, then poll for exit.
//!
//! Grounded on `ipc/stop.rs`'s signal-then-poll shape, unchanged apart from
//! reading the PID file via [`crate::ipc::pidfile`] instead of a socket
//! sibling path.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::config::SHUTDOWN_GRACE;
use crate::ipc::pidfile;

/// The daemon itself waits up to `SHUTDOWN_GRACE` before its process exits
/// (`router::serve`'s drain-vs-force-close race); poll for a bit longer than
/// that so a normally draining daemon isn't reported as stuck.
const POLL_MARGIN: Duration = Duration::from_secs(2);

pub fn run() -> Result<()> {
    let Some(pid) = pidfile::read_pid() else {
        bail!("no daemon PID file found (is the daemon running?)");
    };

    if !pidfile::is_alive(pid) {
        println!("daemon (PID {pid}) is not running; cleaning up stale PID file");
        pidfile::remove_pid_file();
        return Ok(());
    }

    #[cfg(unix)]
    {
        println!("sending SIGTERM to daemon (PID {pid})");
        signal::kill(Pid::from_raw(pid), Signal::SIGTERM)?;
    }
    #[cfg(not(unix))]
    {
        bail!("stopping a background daemon is only supported on unix");
    }

    let start = Instant::now();
    let timeout = SHUTDOWN_GRACE + POLL_MARGIN;
    while start.elapsed() < timeout {
        if !pidfile::is_alive(pid) {
            println!("daemon stopped");
            pidfile::remove_pid_file();
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    println!(
        "daemon did not stop within {}s; you may need to kill PID {pid} manually",
        timeout.as_secs()
    );
    Ok(())
}

//! PID file helpers for the `start --background`/`stop`/`status` CLI surface
//! (§4.G, §6 control plane CLI).
//!
//! Grounded on `ipc/socket.rs`'s PID-file liveness check (`kill(pid, 0)`) and
//! path-resolution shape, adapted away from the Unix-socket-bridge model:
//! this proxy's real surface is the axum HTTP server bound to `PROXY_PORT`,
//! not a socket a client pipes stdio through (no stdio transport, per §1's
//! non-goals), so there is no listener socket to bind here — only a PID
//! file and a log file under [`crate::config::hub_home`].

use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use nix::unistd::Pid;

use crate::config::hub_home;

pub fn pid_path() -> PathBuf {
    hub_home().join("proxy.pid")
}

pub fn log_path() -> PathBuf {
    hub_home().join("proxy.log")
}

pub fn write_pid(pid: u32) -> std::io::Result<()> {
    let home = hub_home();
    fs::create_dir_all(&home)?;
    fs::write(pid_path(), pid.to_string())
}

pub fn read_pid() -> Option<i32> {
    fs::read_to_string(pid_path()).ok()?.trim().parse().ok()
}

/// `kill(pid, 0)`: succeeds iff a process with that PID exists and is
/// signalable by us. Absence of the PID file or an unparseable PID both
/// report "not alive".
#[cfg(unix)]
pub fn is_alive(pid: i32) -> bool {
    nix::sys::signal::kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
pub fn is_alive(_pid: i32) -> bool {
    false
}

pub fn cleanup(path: &Path) {
    let _ = fs::remove_file(path);
}

pub fn remove_pid_file() {
    cleanup(&pid_path());
}

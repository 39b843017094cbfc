//! Process-wide settings, constructed once at startup and owned by the
//! Control Plane (see `SPEC_FULL.md` §9, "Global mutable state").
//!
//! Sourced entirely from environment variables per §6 — there is no gateway
//! YAML config file in this system; the only YAML this crate parses is the
//! compose document consumed by [`crate::compose`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Fixed timeouts from §5 that the distilled spec does not expose as
/// environment variables. Kept as named constants rather than inlined
/// literals so a future version can promote them without touching call
/// sites.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
pub const CAPABILITY_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);
/// Routing budget subtracted from the remaining deadline on each forwarding
/// attempt, per §4.F's timeout policy.
pub const ROUTING_BUDGET: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub compose_file: PathBuf,
    pub log_level: String,
    pub probe_interval: Duration,
    pub fail_threshold: u32,
}

impl Settings {
    /// Load settings from the environment, applying the defaults in §6.
    /// A present-but-unparseable variable is a configuration error (exit
    /// code 3, per §6).
    pub fn from_env() -> Result<Self> {
        let port = parse_env_or("PROXY_PORT", 3000u16)?;
        let compose_file = std::env::var("MCP_COMPOSE_FILE")
            .unwrap_or_else(|_| "./docker-compose.yml".to_string())
            .into();
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let probe_interval_secs = parse_env_or("PROXY_PROBE_INTERVAL_SECONDS", 30u64)?;
        let fail_threshold = parse_env_or("PROXY_FAIL_THRESHOLD", 3u32)?;

        Ok(Settings {
            port,
            compose_file,
            log_level,
            probe_interval: Duration::from_secs(probe_interval_secs),
            fail_threshold,
        })
    }
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}={raw:?}: {e}"))
            .context("configuration error"),
    }
}

/// Directory under which the daemon's PID file and log file live.
pub fn hub_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-hub")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear() {
        for key in [
            "PROXY_PORT",
            "MCP_COMPOSE_FILE",
            "LOG_LEVEL",
            "PROXY_PROBE_INTERVAL_SECONDS",
            "PROXY_FAIL_THRESHOLD",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_match_spec() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        let s = Settings::from_env().unwrap();
        assert_eq!(s.port, 3000);
        assert_eq!(s.compose_file, PathBuf::from("./docker-compose.yml"));
        assert_eq!(s.log_level, "info");
        assert_eq!(s.probe_interval, Duration::from_secs(30));
        assert_eq!(s.fail_threshold, 3);
    }

    #[test]
    fn overrides_are_honored() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        unsafe {
            std::env::set_var("PROXY_PORT", "8080");
            std::env::set_var("PROXY_FAIL_THRESHOLD", "5");
        }
        let s = Settings::from_env().unwrap();
        assert_eq!(s.port, 8080);
        assert_eq!(s.fail_threshold, 5);
        clear();
    }

    #[test]
    fn invalid_port_is_a_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear();
        unsafe { std::env::set_var("PROXY_PORT", "not-a-number") };
        let result = Settings::from_env();
        assert!(result.is_err());
        clear();
    }
}

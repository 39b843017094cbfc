//! Control Plane (§4.G) — startup sequencing, reload, and graceful shutdown.
//!
//! Grounded on `main.rs`'s `initialize()` (build shared state, spawn
//! background tasks, return a handle) and the daemon accept loop's shutdown
//! sequence (`client_tracker.close()` → `.wait()` →
//! `shutdown_notify.notify_waiters()`), adapted so the startup order matches
//! §4.G exactly: Parser → Registry seed → Router begins accepting (serving
//! `healthy_servers=0`) → Health Monitor starts → immediate first probe
//! sweep, then on interval.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::capability::CapabilityIndex;
use crate::compose;
use crate::config::Settings;
use crate::health;
use crate::metrics::Metrics;
use crate::registry::BackendRegistry;
use crate::router::{self, AppState};

/// Shared state handed to the Router and Health Monitor; returned to the
/// caller so `reload()`/shutdown can be driven externally (e.g. by a signal
/// handler in `main`).
pub struct Hub {
    pub registry: Arc<BackendRegistry>,
    pub index: Arc<CapabilityIndex>,
    pub metrics: Arc<Metrics>,
    pub settings: Settings,
    health_shutdown: Arc<Notify>,
    router_shutdown: Arc<Notify>,
}

impl Hub {
    /// Run the full startup sequence of §4.G: Parser → Registry seed →
    /// (caller then calls `serve()` to let the Router begin accepting) →
    /// Health Monitor starts → immediate first probe sweep, then on interval.
    pub async fn start(settings: Settings) -> Result<Self> {
        let raw = std::fs::read_to_string(&settings.compose_file).with_context(|| {
            format!(
                "reading compose file {}",
                settings.compose_file.display()
            )
        })?;
        let candidates = compose::parse(&raw)?;

        let registry = Arc::new(BackendRegistry::new());
        for c in &candidates {
            registry.upsert(&c.name, &c.base_url);
        }
        info!(backends = candidates.len(), "registry seeded from compose file");

        let metrics = Arc::new(Metrics::new());
        let index = Arc::new(CapabilityIndex::new(Arc::clone(&metrics)));

        let health_shutdown = Arc::new(Notify::new());
        {
            let registry = Arc::clone(&registry);
            let index = Arc::clone(&index);
            let metrics = Arc::clone(&metrics);
            let probe_interval = settings.probe_interval;
            let fail_threshold = settings.fail_threshold;
            let shutdown = Arc::clone(&health_shutdown);
            tokio::spawn(async move {
                health::run(registry, index, metrics, probe_interval, fail_threshold, shutdown).await;
            });
        }

        Ok(Hub {
            registry,
            index,
            metrics,
            settings,
            health_shutdown,
            router_shutdown: Arc::new(Notify::new()),
        })
    }

    /// Let the Router begin accepting connections. Blocks until `shutdown()`
    /// is called from elsewhere and the Router has drained in-flight
    /// requests.
    pub async fn serve(&self) -> Result<()> {
        router::serve(
            AppState {
                registry: Arc::clone(&self.registry),
                index: Arc::clone(&self.index),
                metrics: Arc::clone(&self.metrics),
            },
            self.settings.port,
            Arc::clone(&self.router_shutdown),
        )
        .await
    }

    /// Re-run the Parser, diff against the Registry, and apply Upsert/Remove.
    /// Never touches in-flight requests (§4.G) — the Registry lock is held
    /// only for the duration of each individual upsert/remove call.
    pub fn reload(&self) -> Result<()> {
        let raw = std::fs::read_to_string(&self.settings.compose_file).with_context(|| {
            format!(
                "reading compose file {}",
                self.settings.compose_file.display()
            )
        })?;
        let candidates = compose::parse(&raw)?;

        let seen: std::collections::HashSet<String> =
            candidates.iter().map(|c| c.name.clone()).collect();

        for c in &candidates {
            self.registry.upsert(&c.name, &c.base_url);
        }
        for existing in self.registry.active_names() {
            if !seen.contains(&existing) {
                self.registry.remove(&existing);
            }
        }
        self.index.rebuild(&self.registry);
        info!(backends = candidates.len(), "reload applied");
        Ok(())
    }

    /// Stop accepting new connections and cancel the Health Monitor.
    ///
    /// Returns as soon as both shutdown notifications are sent; it does not
    /// itself wait out the grace period. `router::serve` is the one racing
    /// the in-flight drain against `SHUTDOWN_GRACE` and force-closing if it
    /// elapses, so the caller just needs to await the task running
    /// `serve()` after calling this (as `main.rs` does) to observe the
    /// bounded total shutdown time.
    pub async fn shutdown(&self) {
        info!("control plane shutting down");
        self.health_shutdown.notify_waiters();
        self.router_shutdown.notify_waiters();
    }
}

/// Install a SIGHUP handler that triggers `reload()` for the lifetime of the
/// process (Open Question decision, see `DESIGN.md`).
#[cfg(unix)]
pub fn spawn_reload_on_sighup(hub: Arc<Hub>) -> Result<()> {
    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
    tokio::spawn(async move {
        loop {
            sighup.recv().await;
            info!("received SIGHUP, reloading");
            if let Err(e) = hub.reload() {
                warn!(error = %e, "reload failed");
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_reload_on_sighup(_hub: Arc<Hub>) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings_for(compose_path: &std::path::Path) -> Settings {
        Settings {
            port: 0,
            compose_file: compose_path.to_path_buf(),
            log_level: "error".to_string(),
            probe_interval: Duration::from_secs(3600),
            fail_threshold: 100,
        }
    }

    fn write_compose(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("docker-compose.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn start_seeds_registry_from_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let compose = write_compose(
            &dir,
            r#"
services:
  a:
    ports:
      - "8081:8080"
  b:
    ports:
      - "8082:8080"
"#,
        );

        let hub = Hub::start(settings_for(&compose)).await.unwrap();

        let a = hub.registry.get("a").expect("backend a seeded");
        assert_eq!(a.base_url, "http://localhost:8081");
        let b = hub.registry.get("b").expect("backend b seeded");
        assert_eq!(b.base_url, "http://localhost:8082");
        assert_eq!(hub.registry.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn reload_applies_upsert_and_remove_diff() {
        let dir = tempfile::tempdir().unwrap();
        let compose = write_compose(
            &dir,
            r#"
services:
  a:
    ports:
      - "8081:8080"
  b:
    ports:
      - "8082:8080"
"#,
        );

        let hub = Hub::start(settings_for(&compose)).await.unwrap();
        assert!(hub.registry.get("a").is_some());
        assert!(hub.registry.get("b").is_some());

        // Service `b` drops out, service `c` is new, `a` is untouched.
        write_compose(
            &dir,
            r#"
services:
  a:
    ports:
      - "8081:8080"
  c:
    ports:
      - "8083:8080"
"#,
        );

        hub.reload().unwrap();

        let b = hub.registry.get("b").expect("removed backends stay in the map");
        assert_eq!(b.state, crate::registry::BackendState::Removed);
        assert!(!hub.registry.active_names().contains(&"b".to_string()));

        let c = hub.registry.get("c").expect("backend c upserted on reload");
        assert_eq!(c.base_url, "http://localhost:8083");

        assert!(hub.registry.get("a").is_some());
        assert!(hub.registry.active_names().contains(&"a".to_string()));
    }
}

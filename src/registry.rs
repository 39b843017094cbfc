//! Backend Registry (§4.B) — the canonical, single-writer-many-readers store
//! of [`Backend`] records (§3).
//!
//! Grounded on `backend/mod.rs`'s `BackendManager`: one concurrent map guarded
//! by a single lock for mutations, with a `Snapshot`-style accessor that
//! copies records out so the lock is never held across a caller's work. The
//! teacher's process-lifecycle machinery (spawn/stop/restart a child process,
//! prerequisite processes, reaper tasks) has no counterpart here — these
//! backends are passive, externally-running HTTP services discovered from a
//! compose file; the Registry only tracks their health state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

/// Health-relevant lifecycle state of a backend, per §3/§4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    Unknown,
    Probing,
    Healthy,
    Unhealthy,
    Removed,
}

/// The MCP capabilities last advertised by a backend: the raw `initialize`
/// result plus the flattened lists used to build the Capability Index.
/// Per `SPEC_FULL.md` §9 ("duck-typed capability objects"), this is modeled
/// as an opaque record carrying the original JSON plus only the extracted
/// keys dispatch actually needs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    pub raw: Option<Value>,
    pub tools: Vec<String>,
    /// Resource URI patterns advertised (prefixes or concrete URIs).
    pub resources: Vec<String>,
    pub prompts: Vec<String>,
}

/// One logical MCP server, owned exclusively by the Registry.
#[derive(Debug, Clone, Serialize)]
pub struct Backend {
    pub name: String,
    pub base_url: String,
    pub state: BackendState,
    /// Milliseconds since epoch; 0 if never probed.
    pub last_probe_at: u64,
    pub consecutive_errors: u32,
    pub capabilities: Capabilities,
    /// Milliseconds since epoch; 0 if never initialized.
    pub initialized_at: u64,
}

impl Backend {
    fn new(name: String, base_url: String) -> Self {
        Backend {
            name,
            base_url,
            state: BackendState::Unknown,
            last_probe_at: 0,
            consecutive_errors: 0,
            capabilities: Capabilities::default(),
            initialized_at: 0,
        }
    }
}

/// Immutable point-in-time view of a backend, returned by `Snapshot`/`Get`.
pub type BackendSnapshot = Backend;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Canonical backend store. All mutations take the single internal lock;
/// `snapshot()`/`get()` copy data out before returning so the lock is never
/// held across a caller's subsequent work (§4.B concurrency contract).
pub struct BackendRegistry {
    backends: Mutex<HashMap<String, Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        BackendRegistry {
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or update a backend. On update, a changed `base_url` forces
    /// the backend back to `Unknown` and zeroes its counters — it is, from
    /// the Health Monitor's perspective, a different backend wearing the
    /// same name.
    pub fn upsert(&self, name: &str, base_url: &str) {
        let mut backends = self.backends.lock().unwrap();
        match backends.get_mut(name) {
            Some(existing) if existing.base_url == base_url => {
                // Same URL: reviving a Removed entry on reload, or a no-op upsert.
                if existing.state == BackendState::Removed {
                    existing.state = BackendState::Unknown;
                    existing.consecutive_errors = 0;
                }
            }
            Some(existing) => {
                existing.base_url = base_url.to_string();
                existing.state = BackendState::Unknown;
                existing.consecutive_errors = 0;
                existing.capabilities = Capabilities::default();
                existing.initialized_at = 0;
            }
            None => {
                backends.insert(name.to_string(), Backend::new(name.to_string(), base_url.to_string()));
            }
        }
    }

    pub fn mark_probing(&self, name: &str) {
        self.transition(name, |b| {
            b.state = BackendState::Probing;
            b.last_probe_at = now_millis();
        });
    }

    /// Record a successful probe. `caps` is `Some` only on the first success
    /// after a non-`Healthy` state (capability refresh), per §4.C.
    pub fn mark_healthy(&self, name: &str, caps: Option<Capabilities>) {
        self.transition(name, |b| {
            b.state = BackendState::Healthy;
            b.consecutive_errors = 0;
            b.last_probe_at = now_millis();
            if let Some(caps) = caps {
                b.capabilities = caps;
                b.initialized_at = now_millis();
            }
        });
    }

    /// Record a failed probe. Returns the backend's `consecutive_errors`
    /// count after the increment, or `None` if the backend is absent.
    pub fn mark_unhealthy(&self, name: &str, _err: &str) -> Option<u32> {
        let mut backends = self.backends.lock().unwrap();
        let backend = backends.get_mut(name)?;
        backend.state = BackendState::Unhealthy;
        backend.consecutive_errors += 1;
        backend.last_probe_at = now_millis();
        Some(backend.consecutive_errors)
    }

    /// Record a failed health probe, applying the `failThreshold` grace
    /// period: a backend that was `Healthy` stays `Healthy` until its
    /// `consecutive_errors` reaches `fail_threshold`, at which point it is
    /// demoted to `Unhealthy` (§4.C). A backend that was not yet `Healthy`
    /// (still `Unknown`/`Probing`) is demoted on the first failure, since
    /// there is no established health to protect.
    ///
    /// Returns the resulting `(state, consecutive_errors)`, or `None` if the
    /// backend is absent.
    pub fn record_probe_failure(&self, name: &str, fail_threshold: u32) -> Option<(BackendState, u32)> {
        let mut backends = self.backends.lock().unwrap();
        let backend = backends.get_mut(name)?;
        backend.consecutive_errors += 1;
        backend.last_probe_at = now_millis();
        if backend.state != BackendState::Healthy || backend.consecutive_errors >= fail_threshold {
            backend.state = BackendState::Unhealthy;
        }
        Some((backend.state, backend.consecutive_errors))
    }

    pub fn remove(&self, name: &str) {
        self.transition(name, |b| {
            b.state = BackendState::Removed;
        });
    }

    /// Immutable, consistent view of every backend, copied out under the
    /// lock. Used by the management surface and the Capability Index builder.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        self.backends.lock().unwrap().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<BackendSnapshot> {
        self.backends.lock().unwrap().get(name).cloned()
    }

    /// All non-`Removed` backend names, for the Health Monitor's probe loop.
    pub fn active_names(&self) -> Vec<String> {
        self.backends
            .lock()
            .unwrap()
            .values()
            .filter(|b| b.state != BackendState::Removed)
            .map(|b| b.name.clone())
            .collect()
    }

    fn transition(&self, name: &str, f: impl FnOnce(&mut Backend)) {
        let mut backends = self.backends.lock().unwrap();
        if let Some(backend) = backends.get_mut(name) {
            f(backend);
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Capability Index (§4.D) — the atomically-published read-only map used by
//! the Router for O(1) backend resolution.
//!
//! Grounded on `registry.rs`'s `ToolRegistry` for container choice
//! (concurrent maps), and on `config.rs`'s `Arc<ArcSwap<Config>>` pattern for
//! the replace-pointer atomic publish this index's invariant requires. The
//! collision tie-break and conflict counter are new to this system, built
//! directly from §4.D's build algorithm.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::metrics::Metrics;
use crate::registry::{BackendRegistry, BackendSnapshot, BackendState};

/// One resolved index, built fresh on every publish. Old indexes are simply
/// dropped when the `ArcSwap` pointer is replaced — readers holding an `Arc`
/// to a stale index keep it alive until they finish using it.
#[derive(Debug, Default)]
struct Index {
    tool_owner: HashMap<String, String>,
    /// Longest-prefix match against this map; see `resolve_resource`.
    resource_owner: HashMap<String, String>,
    prompt_owner: HashMap<String, String>,
    /// Keys in the order `rebuild()` first inserted them (oldest-Healthy-first,
    /// §4.D step 2). `HashMap`'s own iteration order is arbitrary, so the
    /// `list_*` methods read from these instead of the maps' keys.
    tool_order: Vec<String>,
    resource_order: Vec<String>,
    prompt_order: Vec<String>,
}

/// Published capability index. Cloning is cheap (`Arc` to the underlying
/// registry + metrics); the index itself is behind an `ArcSwap` so readers
/// never block writers and never observe a partial rebuild.
pub struct CapabilityIndex {
    current: ArcSwap<Index>,
    metrics: Arc<Metrics>,
}

impl CapabilityIndex {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        CapabilityIndex {
            current: ArcSwap::from_pointee(Index::default()),
            metrics,
        }
    }

    /// Rebuild the index from a fresh Registry snapshot and atomically
    /// publish it. Called whenever a backend's `Healthy` status or
    /// capability set changes (§4.D).
    ///
    /// This recomputes the whole index from scratch every time, per §4.D
    /// step 3's "for each backend in order... otherwise increment" — a
    /// standing collision between two still-healthy backends is rediscovered
    /// and recounted on every rebuild, not just the one that introduced it.
    /// `capability_conflicts_total` is therefore a count of collisions
    /// observed across rebuilds, not distinct colliding name pairs.
    pub fn rebuild(&self, registry: &BackendRegistry) {
        let mut healthy: Vec<BackendSnapshot> = registry
            .snapshot()
            .into_iter()
            .filter(|b| b.state == BackendState::Healthy)
            .collect();

        // Oldest-`Healthy`-first tie-break rule (§3 Collision policy, §4.D step 2).
        healthy.sort_by_key(|b| b.initialized_at);

        let mut index = Index::default();
        for backend in &healthy {
            for tool in &backend.capabilities.tools {
                if insert_or_count_conflict(&mut index.tool_owner, tool, &backend.name, &self.metrics) {
                    index.tool_order.push(tool.clone());
                }
            }
            for prompt in &backend.capabilities.prompts {
                if insert_or_count_conflict(&mut index.prompt_owner, prompt, &backend.name, &self.metrics) {
                    index.prompt_order.push(prompt.clone());
                }
            }
            for resource in &backend.capabilities.resources {
                if insert_or_count_conflict(&mut index.resource_owner, resource, &backend.name, &self.metrics) {
                    index.resource_order.push(resource.clone());
                }
            }
        }

        self.current.store(Arc::new(index));
    }

    pub fn resolve_tool(&self, name: &str) -> Option<String> {
        self.current.load().tool_owner.get(name).cloned()
    }

    pub fn resolve_prompt(&self, name: &str) -> Option<String> {
        self.current.load().prompt_owner.get(name).cloned()
    }

    /// Longest-prefix match on the requested URI against registered
    /// prefixes; falls back to exact match when no prefix matches (§4.D
    /// Resource lookup).
    pub fn resolve_resource(&self, uri: &str) -> Option<String> {
        let index = self.current.load();
        if let Some(owner) = index.resource_owner.get(uri) {
            return Some(owner.clone());
        }
        index
            .resource_owner
            .iter()
            .filter(|(prefix, _)| uri.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, owner)| owner.clone())
    }

    /// Snapshot of all tool/resource/prompt names currently published, in
    /// build order (oldest-Healthy-first), for `tools/list` etc. (§4.F).
    pub fn list_tools(&self) -> Vec<String> {
        self.current.load().tool_order.clone()
    }

    pub fn list_resources(&self) -> Vec<String> {
        self.current.load().resource_order.clone()
    }

    pub fn list_prompts(&self) -> Vec<String> {
        self.current.load().prompt_order.clone()
    }
}

/// Inserts `key -> owner` unless already present, in which case the conflict
/// counter is incremented instead. Returns whether the insert happened, so
/// callers can maintain an insertion-ordered list alongside the map.
fn insert_or_count_conflict(
    map: &mut HashMap<String, String>,
    key: &str,
    owner: &str,
    metrics: &Metrics,
) -> bool {
    if map.contains_key(key) {
        metrics.record_conflict();
        false
    } else {
        map.insert(key.to_string(), owner.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Capabilities;

    fn healthy_backend(registry: &BackendRegistry, name: &str, url: &str, tools: &[&str]) {
        registry.upsert(name, url);
        registry.mark_probing(name);
        registry.mark_healthy(
            name,
            Some(Capabilities {
                tools: tools.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }),
        );
    }

    #[test]
    fn single_owner_resolves() {
        let registry = BackendRegistry::new();
        healthy_backend(&registry, "a", "http://localhost:8081", &["scrape"]);
        let index = CapabilityIndex::new(Arc::new(Metrics::new()));
        index.rebuild(&registry);

        assert_eq!(index.resolve_tool("scrape"), Some("a".to_string()));
        assert_eq!(index.resolve_tool("nonesuch"), None);
    }

    #[test]
    fn oldest_healthy_wins_collision() {
        let registry = BackendRegistry::new();
        healthy_backend(&registry, "a", "http://localhost:8081", &["scrape"]);
        // Ensure strictly later initialized_at for b.
        std::thread::sleep(std::time::Duration::from_millis(2));
        healthy_backend(&registry, "b", "http://localhost:8082", &["scrape"]);

        let metrics = Arc::new(Metrics::new());
        let index = CapabilityIndex::new(metrics.clone());
        index.rebuild(&registry);

        assert_eq!(index.resolve_tool("scrape"), Some("a".to_string()));
        assert_eq!(metrics.conflicts_total(), 1);
    }

    #[test]
    fn list_tools_preserves_oldest_healthy_first_build_order() {
        let registry = BackendRegistry::new();
        healthy_backend(&registry, "a", "http://localhost:8081", &["scrape"]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        healthy_backend(&registry, "b", "http://localhost:8082", &["search"]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        healthy_backend(&registry, "c", "http://localhost:8083", &["summarize"]);

        let index = CapabilityIndex::new(Arc::new(Metrics::new()));
        index.rebuild(&registry);

        assert_eq!(
            index.list_tools(),
            vec!["scrape".to_string(), "search".to_string(), "summarize".to_string()]
        );
    }

    #[test]
    fn unhealthy_backend_excluded() {
        let registry = BackendRegistry::new();
        registry.upsert("a", "http://localhost:8081");
        registry.mark_probing("a");
        registry.mark_unhealthy("a", "boom");

        let index = CapabilityIndex::new(Arc::new(Metrics::new()));
        index.rebuild(&registry);
        assert_eq!(index.resolve_tool("scrape"), None);
    }

    #[test]
    fn resource_longest_prefix_match() {
        let registry = BackendRegistry::new();
        registry.upsert("a", "http://localhost:8081");
        registry.mark_probing("a");
        registry.mark_healthy(
            "a",
            Some(Capabilities {
                resources: vec!["file:///repo/".to_string()],
                ..Default::default()
            }),
        );
        registry.upsert("b", "http://localhost:8082");
        registry.mark_probing("b");
        registry.mark_healthy(
            "b",
            Some(Capabilities {
                resources: vec!["file:///repo/docs/".to_string()],
                ..Default::default()
            }),
        );

        let index = CapabilityIndex::new(Arc::new(Metrics::new()));
        index.rebuild(&registry);

        assert_eq!(
            index.resolve_resource("file:///repo/docs/readme.md"),
            Some("b".to_string())
        );
        assert_eq!(
            index.resolve_resource("file:///repo/other.md"),
            Some("a".to_string())
        );
        assert_eq!(index.resolve_resource("file:///unrelated"), None);
    }

    #[test]
    fn demotion_removes_from_published_index_on_rebuild() {
        let registry = BackendRegistry::new();
        healthy_backend(&registry, "a", "http://localhost:8081", &["scrape"]);
        let index = CapabilityIndex::new(Arc::new(Metrics::new()));
        index.rebuild(&registry);
        assert!(index.resolve_tool("scrape").is_some());

        registry.mark_unhealthy("a", "demoted");
        index.rebuild(&registry);
        assert_eq!(index.resolve_tool("scrape"), None);
    }
}

//! Health Monitor (§4.C) — drives each backend through its state machine via
//! periodic `GET /health` probes, promoting/demoting between `Healthy` and
//! `Unhealthy` and refreshing capabilities on the first recovery success.
//!
//! Grounded on `backend/health.rs`'s `run_health_checker` loop shape
//! (`tokio::select!` against a shutdown `Notify`, concurrent pings with one
//! probe in flight per backend) and on `other_examples`
//! `Layer-Prime-Solutions-porter/src/server/http.rs`'s reconnect loop. The
//! state machine itself differs from the teacher's process-restart circuit
//! breaker — there is no process to restart here, only an HTTP probe retried
//! on the next scheduled tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use crate::capability::CapabilityIndex;
use crate::client::McpClient;
use crate::config::{CAPABILITY_REFRESH_TIMEOUT, PROBE_TIMEOUT};
use crate::metrics::Metrics;
use crate::registry::{BackendRegistry, BackendState, Capabilities};

/// Run the probe loop until `shutdown` is notified. Probes run concurrently
/// across backends (`futures::future::join_all`), but at most one probe per
/// backend is ever in flight, satisfying §4.C's scheduling rule.
pub async fn run(
    registry: Arc<BackendRegistry>,
    index: Arc<CapabilityIndex>,
    metrics: Arc<Metrics>,
    probe_interval: Duration,
    fail_threshold: u32,
    shutdown: Arc<Notify>,
) {
    // First probe sweep runs immediately on start, per §4.G startup order.
    sweep(&registry, &index, &metrics, fail_threshold).await;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(probe_interval) => {
                sweep(&registry, &index, &metrics, fail_threshold).await;
            }
            _ = shutdown.notified() => {
                info!("health monitor shutting down");
                return;
            }
        }
    }
}

async fn sweep(
    registry: &Arc<BackendRegistry>,
    index: &Arc<CapabilityIndex>,
    metrics: &Arc<Metrics>,
    fail_threshold: u32,
) {
    let names = registry.active_names();
    let probes = names.into_iter().map(|name| {
        let registry = Arc::clone(registry);
        let index = Arc::clone(index);
        let metrics = Arc::clone(metrics);
        async move {
            probe_one(&registry, &index, &metrics, &name, fail_threshold).await;
        }
    });
    futures::future::join_all(probes).await;
}

async fn probe_one(
    registry: &BackendRegistry,
    index: &CapabilityIndex,
    metrics: &Metrics,
    name: &str,
    fail_threshold: u32,
) {
    let Some(backend) = registry.get(name) else {
        return;
    };
    let was_healthy = backend.state == BackendState::Healthy;
    if backend.state == BackendState::Unknown {
        registry.mark_probing(name);
    }

    let client = McpClient::new(name, backend.base_url.clone());
    match client.probe_health(PROBE_TIMEOUT).await {
        Ok(()) => {
            if was_healthy {
                registry.mark_healthy(name, None);
            } else {
                // First success after a non-Healthy state: refresh capabilities
                // before announcing Healthy (§4.C).
                match refresh_capabilities(&client).await {
                    Ok(caps) => {
                        info!(backend = name, from = ?backend.state, to = "healthy", "backend promoted");
                        registry.mark_healthy(name, Some(caps));
                        index.rebuild(registry);
                    }
                    Err(e) => {
                        warn!(backend = name, error = %e, "capability refresh failed, staying unhealthy");
                        registry.mark_unhealthy(name, &e.to_string());
                        metrics.record_error(e.metric_kind());
                    }
                }
            }
        }
        Err(e) => {
            metrics.record_error(e.metric_kind());
            let outcome = registry.record_probe_failure(name, fail_threshold);
            match outcome {
                Some((BackendState::Unhealthy, errors)) if was_healthy => {
                    warn!(backend = name, errors, "backend demoted to unhealthy");
                    index.rebuild(registry);
                }
                Some((_, errors)) => {
                    warn!(backend = name, error = %e, errors, "probe failed");
                }
                None => {}
            }
        }
    }
}

async fn refresh_capabilities(client: &McpClient) -> Result<Capabilities, crate::error::HubError> {
    client
        .call("initialize", None, CAPABILITY_REFRESH_TIMEOUT)
        .await?;

    let tools = client
        .call("tools/list", None, CAPABILITY_REFRESH_TIMEOUT)
        .await?;
    let resources = client
        .call("resources/list", None, CAPABILITY_REFRESH_TIMEOUT)
        .await?;
    let prompts = client
        .call("prompts/list", None, CAPABILITY_REFRESH_TIMEOUT)
        .await?;

    Ok(Capabilities {
        raw: None,
        tools: extract_names(&tools, "tools"),
        resources: extract_names(&resources, "resources"),
        prompts: extract_names(&prompts, "prompts"),
    })
}

fn extract_names(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.get("name")
                        .or_else(|| item.get("uri"))
                        .and_then(|n| n.as_str())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_backend(healthy: std::sync::Arc<std::sync::atomic::AtomicBool>) -> String {
        let app = Router::new()
            .route(
                "/health",
                get(move || {
                    let healthy = healthy.clone();
                    async move {
                        if healthy.load(std::sync::atomic::Ordering::SeqCst) {
                            axum::http::StatusCode::OK
                        } else {
                            axum::http::StatusCode::SERVICE_UNAVAILABLE
                        }
                    }
                }),
            )
            .route(
                "/mcp",
                post(|Json(req): Json<serde_json::Value>| async move {
                    let method = req["method"].as_str().unwrap_or("");
                    let result = match method {
                        "tools/list" => json!({"tools": [{"name": "scrape"}]}),
                        "resources/list" => json!({"resources": []}),
                        "prompts/list" => json!({"prompts": []}),
                        _ => json!({}),
                    };
                    Json(json!({"jsonrpc": "2.0", "id": req["id"], "result": result}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn promotes_to_healthy_and_populates_capabilities() {
        let healthy = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let base_url = spawn_backend(healthy).await;

        let registry = BackendRegistry::new();
        registry.upsert("a", &base_url);
        let index = CapabilityIndex::new(Arc::new(Metrics::new()));
        let metrics = Metrics::new();

        probe_one(&registry, &index, &metrics, "a", 3).await;

        let b = registry.get("a").unwrap();
        assert_eq!(b.state, BackendState::Healthy);
        assert_eq!(b.capabilities.tools, vec!["scrape".to_string()]);
        assert_eq!(index.resolve_tool("scrape"), Some("a".to_string()));
    }

    #[tokio::test]
    async fn demotes_after_fail_threshold() {
        let healthy = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let base_url = spawn_backend(healthy.clone()).await;

        let registry = BackendRegistry::new();
        registry.upsert("a", &base_url);
        let index = CapabilityIndex::new(Arc::new(Metrics::new()));
        let metrics = Metrics::new();

        probe_one(&registry, &index, &metrics, "a", 3).await;
        assert_eq!(registry.get("a").unwrap().state, BackendState::Healthy);

        healthy.store(false, std::sync::atomic::Ordering::SeqCst);
        probe_one(&registry, &index, &metrics, "a", 3).await;
        assert_eq!(registry.get("a").unwrap().state, BackendState::Healthy);
        assert_eq!(registry.get("a").unwrap().consecutive_errors, 1);

        probe_one(&registry, &index, &metrics, "a", 3).await;
        assert_eq!(registry.get("a").unwrap().consecutive_errors, 2);
        assert_eq!(registry.get("a").unwrap().state, BackendState::Healthy);

        probe_one(&registry, &index, &metrics, "a", 3).await;
        assert_eq!(registry.get("a").unwrap().consecutive_errors, 3);
        assert_eq!(registry.get("a").unwrap().state, BackendState::Unhealthy);
        assert_eq!(index.resolve_tool("scrape"), None);
    }
}

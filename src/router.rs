//! Router / Aggregator (§4.F) — the single network face of the system: an
//! axum HTTP server exposing the MCP JSON-RPC endpoint plus a management
//! surface.
//!
//! Route layout and middleware stack grounded on `other_examples`
//! `doublegate-Only1MCP/src/proxy/server.rs`'s `build_router`, adapted to
//! route only `/mcp` to the JSON-RPC handler — `/` is left unmatched and
//! falls through to axum's default 404, per the Open Question decision
//! below to pick one path and reject the other. `tower::ServiceBuilder`
//! wraps `TraceLayer`/`TimeoutLayer`/`CorsLayer`. `AppState`/
//! `axum::serve(...).with_graceful_shutdown(...)` follows `admin.rs`'s admin
//! API server, with the drain raced against a force-close timer (axum's
//! graceful shutdown has no timeout of its own) so a stuck in-flight request
//! cannot hang the process past `SHUTDOWN_GRACE`. Method dispatch itself is
//! new — built directly from §4.F's aggregation contract.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::capability::CapabilityIndex;
use crate::client::McpClient;
use crate::config::{REQUEST_DEADLINE, ROUTING_BUDGET, SHUTDOWN_GRACE};
use crate::error::{HubError, JSONRPC_METHOD_NOT_FOUND};
use crate::metrics::Metrics;
use crate::registry::{BackendRegistry, BackendState};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub index: Arc<CapabilityIndex>,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(handle_jsonrpc))
        .route("/health", get(handle_health))
        .route("/servers", get(handle_servers))
        .route("/status", get(handle_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_DEADLINE))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: Arc<Notify>,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "router accepting connections");

    let drain_shutdown = Arc::clone(&shutdown);
    let serve_fut =
        axum::serve(listener, app).with_graceful_shutdown(async move {
            drain_shutdown.notified().await;
        });

    let force_close = async {
        shutdown.notified().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };

    tokio::select! {
        result = serve_fut => result?,
        _ = force_close => {
            warn!("in-flight requests did not drain within shutdown grace period, force-closing");
        }
    }

    info!("router stopped");
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    servers: usize,
    healthy_servers: usize,
    server_list: Vec<String>,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.registry.snapshot();
    let servers = snapshot.len();
    let healthy: Vec<&str> = snapshot
        .iter()
        .filter(|b| b.state == BackendState::Healthy)
        .map(|b| b.name.as_str())
        .collect();
    Json(HealthResponse {
        status: if healthy.is_empty() && servers > 0 {
            "degraded"
        } else {
            "ok"
        },
        servers,
        healthy_servers: healthy.len(),
        server_list: healthy.into_iter().map(str::to_string).collect(),
    })
}

async fn handle_servers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "backends": state.registry.snapshot() }))
}

async fn handle_status(State(state): State<AppState>) -> String {
    let snapshot = state.registry.snapshot();
    let mut out = String::from("MCP Hub status\n");
    for b in &snapshot {
        out.push_str(&format!(
            "  {:<20} {:?}  errors={}\n",
            b.name, b.state, b.consecutive_errors
        ));
    }
    out.push_str(&format!(
        "capability conflicts: {}\n",
        state.metrics.conflicts_total()
    ));
    out
}

/// Dispatch a single JSON-RPC request or notification per §4.F's aggregation
/// contract.
async fn handle_jsonrpc(State(state): State<AppState>, Json(req): Json<Value>) -> Json<Value> {
    let id = req.get("id").cloned();
    let method = req.get("method").and_then(Value::as_str).unwrap_or("");
    let params = req.get("params").cloned();

    if id.is_none() && method.starts_with("notifications/") {
        handle_notification(&state, method, params).await;
        // Notifications get no body per §4.F point 6; axum still needs a
        // response, so send an empty JSON-RPC-shaped object the caller can
        // ignore (no `id` present, so it is not a valid response to match).
        return Json(Value::Null);
    }

    let deadline = Instant::now() + REQUEST_DEADLINE;
    let result = dispatch(&state, method, params, deadline).await;
    Json(to_envelope(id, result))
}

async fn dispatch(
    state: &AppState,
    method: &str,
    params: Option<Value>,
    deadline: Instant,
) -> Result<Value, HubError> {
    match method {
        "initialize" => Ok(synthesize_initialize(state)),
        "tools/list" => Ok(json!({ "tools": state.index.list_tools() })),
        "resources/list" => Ok(json!({ "resources": state.index.list_resources() })),
        "prompts/list" => Ok(json!({ "prompts": state.index.list_prompts() })),
        "tools/call" => {
            let name = param_str(&params, "name")
                .ok_or_else(|| HubError::NotFound("tool not found".into()))?;
            let owner = state
                .index
                .resolve_tool(&name)
                .ok_or_else(|| HubError::NotFound("tool not found".into()))?;
            forward(state, &owner, method, params, deadline).await
        }
        "resources/read" => {
            let uri = param_str(&params, "uri")
                .ok_or_else(|| HubError::NotFound("resource not found".into()))?;
            let owner = state
                .index
                .resolve_resource(&uri)
                .ok_or_else(|| HubError::NotFound("resource not found".into()))?;
            forward(state, &owner, method, params, deadline).await
        }
        "prompts/get" => {
            let name = param_str(&params, "name")
                .ok_or_else(|| HubError::NotFound("prompt not found".into()))?;
            let owner = state
                .index
                .resolve_prompt(&name)
                .ok_or_else(|| HubError::NotFound("prompt not found".into()))?;
            forward(state, &owner, method, params, deadline).await
        }
        _ => Err(HubError::NotFound(format!("unknown method {method}"))),
    }
}

/// Forward a request to `backend`, retrying at most once on `Transport`
/// failure within the remaining deadline budget (§4.F retry policy).
async fn forward(
    state: &AppState,
    backend: &str,
    method: &str,
    params: Option<Value>,
    deadline: Instant,
) -> Result<Value, HubError> {
    let Some(b) = state.registry.get(backend) else {
        return Err(HubError::NotFound(format!("backend {backend} not found")));
    };
    let client = McpClient::new(backend, b.base_url);

    let attempt_budget = |deadline: Instant| -> Result<Duration, HubError> {
        deadline
            .checked_duration_since(Instant::now())
            .and_then(|remaining| remaining.checked_sub(ROUTING_BUDGET))
            .filter(|d| !d.is_zero())
            .ok_or(HubError::Deadline)
    };

    let budget = match attempt_budget(deadline) {
        Ok(b) => b,
        Err(e) => {
            state.metrics.record_error(e.metric_kind());
            return Err(e);
        }
    };

    match client.call(method, params.clone(), budget).await {
        Ok(v) => Ok(v),
        Err(e) if e.is_transport() => {
            warn!(backend, error = %e, "transport failure, retrying once");
            state.metrics.record_error(e.metric_kind());

            let retry_budget = match attempt_budget(deadline) {
                Ok(b) => b,
                Err(e) => {
                    state.metrics.record_error(e.metric_kind());
                    return Err(e);
                }
            };
            match client.call(method, params, retry_budget).await {
                Ok(v) => Ok(v),
                Err(e) => {
                    state.metrics.record_error(e.metric_kind());
                    Err(e)
                }
            }
        }
        Err(e) => {
            state.metrics.record_error(e.metric_kind());
            Err(e)
        }
    }
}

/// Drops every notification and counts it. This implementation keeps no
/// in-flight-call registry keyed by upstream id, so there is no stored
/// correlation to forward `notifications/cancelled` against — every
/// notification, `cancelled` included, is dropped.
async fn handle_notification(state: &AppState, _method: &str, _params: Option<Value>) {
    state.metrics.record_dropped_notification();
}

fn synthesize_initialize(state: &AppState) -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": { "listChanged": false },
            "resources": { "listChanged": false },
            "prompts": { "listChanged": false },
        },
        "tools": state.index.list_tools(),
        "resources": state.index.list_resources(),
        "prompts": state.index.list_prompts(),
    })
}

fn param_str(params: &Option<Value>, key: &str) -> Option<String> {
    params
        .as_ref()?
        .get(key)?
        .as_str()
        .map(str::to_string)
}

fn to_envelope(id: Option<Value>, result: Result<Value, HubError>) -> Value {
    match result {
        Ok(value) => json!({ "jsonrpc": "2.0", "id": id, "result": value }),
        Err(e) => {
            let mut error = json!({ "code": e.code(), "message": e.to_string() });
            if let Some(reason) = e.reason() {
                error["data"] = json!({ "reason": reason });
            }
            if let HubError::Application { data: Some(d), .. } = &e {
                error["data"] = d.clone();
            }
            json!({ "jsonrpc": "2.0", "id": id, "error": error })
        }
    }
}

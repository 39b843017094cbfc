//! MCP Client (§4.E) — a minimal JSON-RPC 2.0 client over HTTP used to talk
//! to exactly one backend.
//!
//! No direct teacher precedent: the teacher's `backend/http.rs` is a typed
//! `rmcp` client, which hides the raw envelope this system needs in order to
//! distinguish `Transport`/`Protocol`/`Application` failures and let the
//! Router control id rewriting and retry. Built with `reqwest` + manual
//! `serde_json::Value` envelope construction, following `backend/http.rs`'s
//! structural shape (struct holding name/base_url/client,
//! `tokio::time::timeout`-wrapped calls).

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::HubError;

/// A thin client bound to one backend's base URL. Cheap to construct;
/// `reqwest::Client` internally pools connections (§5 "bounded pool, default
/// 16 idle").
pub struct McpClient {
    backend_name: String,
    base_url: String,
    http: reqwest::Client,
}

impl McpClient {
    pub fn new(backend_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        McpClient {
            backend_name: backend_name.into(),
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .pool_max_idle_per_host(16)
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }

    /// Issue `GET {base_url}/health`. Success is any status in `[200, 300)`
    /// within `timeout` (§4.C Algorithm).
    pub async fn probe_health(&self, timeout: Duration) -> Result<(), HubError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let response = tokio::time::timeout(timeout, self.http.get(&url).send())
            .await
            .map_err(|_| self.transport_err("health probe timed out"))?
            .map_err(|e| self.transport_err(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.transport_err(format!("unhealthy status {}", response.status())))
        }
    }

    /// Send a JSON-RPC 2.0 request with the client-generated `id` and return
    /// the raw `result` or translate the envelope into the appropriate
    /// `HubError` variant.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, HubError> {
        let id = uuid::Uuid::new_v4().to_string();
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params.unwrap_or(Value::Null),
        });

        let url = format!("{}/mcp", self.base_url.trim_end_matches('/'));
        let send = self.http.post(&url).json(&envelope).send();

        let response = tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| self.transport_err("request timed out"))?
            .map_err(|e| self.transport_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.transport_err(format!("HTTP status {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.protocol_err(format!("invalid JSON body: {e}")))?;

        self.parse_envelope(body)
    }

    fn parse_envelope(&self, body: Value) -> Result<Value, HubError> {
        let obj = body
            .as_object()
            .ok_or_else(|| self.protocol_err("response is not a JSON object"))?;

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(self.protocol_err("missing or invalid jsonrpc field"));
        }

        if let Some(error) = obj.get("error") {
            let code = error.get("code").and_then(Value::as_i64).ok_or_else(|| {
                self.protocol_err("error envelope missing numeric code")
            })?;
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let data = error.get("data").cloned();
            return Err(HubError::Application {
                backend: self.backend_name.clone(),
                code,
                message,
                data,
            });
        }

        obj.get("result")
            .cloned()
            .ok_or_else(|| self.protocol_err("envelope has neither result nor error"))
    }

    fn transport_err(&self, message: impl Into<String>) -> HubError {
        HubError::Transport {
            backend: self.backend_name.clone(),
            message: message.into(),
        }
    }

    fn protocol_err(&self, message: impl Into<String>) -> HubError {
        HubError::Protocol {
            backend: self.backend_name.clone(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn spawn_fake_backend(
        handler: impl Fn(Value) -> Value + Send + Sync + 'static,
    ) -> String {
        let handler = std::sync::Arc::new(handler);
        let app = Router::new().route(
            "/mcp",
            post(move |Json(body): Json<Value>| {
                let handler = handler.clone();
                async move { Json(handler(body)) }
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
    async fn successful_call_returns_result_and_rewrites_nothing_client_side() {
        let base_url = spawn_fake_backend(|req| {
            json!({"jsonrpc": "2.0", "id": req["id"], "result": {"ok": true}})
        })
        .await;

        let client = McpClient::new("a", base_url);
        let result = client
            .call("tools/list", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn application_error_is_surfaced() {
        let base_url = spawn_fake_backend(|req| {
            json!({"jsonrpc": "2.0", "id": req["id"], "error": {"code": -32000, "message": "boom"}})
        })
        .await;

        let client = McpClient::new("a", base_url);
        let err = client
            .call("tools/call", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            HubError::Application { code, message, .. } => {
                assert_eq!(code, -32000);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Application error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Nothing listening on this port.
        let client = McpClient::new("a", "http://127.0.0.1:1");
        let err = client
            .call("tools/list", None, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn call_timeout_is_transport_not_deadline() {
        let base_url = spawn_fake_backend(|_req| {
            // Handler itself doesn't sleep; the client-side timeout below is
            // shorter than any real response, so the call always expires.
            json!({"jsonrpc": "2.0", "id": 1, "result": {}})
        })
        .await;
        let client = McpClient::new("a", base_url);
        let err = client
            .call("tools/list", None, Duration::from_nanos(1))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(!matches!(err, HubError::Deadline));
    }

    #[tokio::test]
    async fn malformed_envelope_is_protocol_error() {
        let base_url = spawn_fake_backend(|_req| json!({"not": "jsonrpc"})).await;
        let client = McpClient::new("a", base_url);
        let err = client
            .call("tools/list", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Protocol { .. }));
    }
}

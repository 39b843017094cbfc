//! Error taxonomy for the MCP Hub proxy.
//!
//! `HubError` is the structured domain taxonomy; call sites that need the
//! JSON-RPC code or `data.reason` string call `code()`/`reason()` rather than
//! re-matching on the variant. Top-level plumbing (CLI handlers, startup)
//! uses `anyhow::Result` with `.context(...)` instead of this type directly.

use thiserror::Error;

/// Standard JSON-RPC 2.0 error codes used by the Router.
pub const JSONRPC_METHOD_NOT_FOUND: i64 = -32601;
pub const JSONRPC_INTERNAL_ERROR: i64 = -32603;

#[derive(Error, Debug)]
pub enum HubError {
    /// The compose document is malformed or unreadable.
    #[error("config error: {0}")]
    Config(String),

    /// Outbound I/O failure talking to a backend (connect, TLS, timeout).
    #[error("transport error talking to backend {backend}: {message}")]
    Transport { backend: String, message: String },

    /// Backend produced a response that is not valid JSON-RPC 2.0.
    #[error("protocol violation from backend {backend}: {message}")]
    Protocol { backend: String, message: String },

    /// A well-formed JSON-RPC error response from a backend.
    #[error("application error from backend {backend}: {code} {message}")]
    Application {
        backend: String,
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Requested tool/resource/prompt is not in the current capability index.
    #[error("not found: {0}")]
    NotFound(String),

    /// Per-request or per-call deadline exceeded.
    #[error("deadline exceeded")]
    Deadline,
}

impl HubError {
    /// JSON-RPC error code this variant is surfaced as, per §7.
    pub fn code(&self) -> i64 {
        match self {
            HubError::Config(_) => JSONRPC_INTERNAL_ERROR,
            HubError::Transport { .. } => JSONRPC_INTERNAL_ERROR,
            HubError::Protocol { .. } => JSONRPC_INTERNAL_ERROR,
            HubError::Application { code, .. } => *code,
            HubError::NotFound(_) => JSONRPC_METHOD_NOT_FOUND,
            HubError::Deadline => JSONRPC_INTERNAL_ERROR,
        }
    }

    /// `data.reason` string for variants that carry one. `None` for
    /// `Application` errors, which are forwarded unchanged.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            HubError::Transport { .. } => Some("transport"),
            HubError::Protocol { .. } => Some("protocol"),
            HubError::Deadline => Some("deadline exceeded"),
            _ => None,
        }
    }

    /// Label used for the `errors_total{kind=...}` counter.
    pub fn metric_kind(&self) -> &'static str {
        match self {
            HubError::Config(_) => "config",
            HubError::Transport { .. } => "transport",
            HubError::Protocol { .. } => "protocol",
            HubError::Application { .. } => "application",
            HubError::NotFound(_) => "not_found",
            HubError::Deadline => "deadline",
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, HubError::Transport { .. })
    }
}

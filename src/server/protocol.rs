//! Request and response bodies exchanged over the shared endpoint.

use serde::{Deserialize, Serialize};

use crate::server::registry::ProxyKind;

/// Header carrying the shared secret.
pub const AUTH_HEADER: &str = "authorization";

/// Longest a single remote pop or capacity wait may block the server, in milliseconds.
///
/// Callers that want to wait longer repeat the request.
pub const MAX_REMOTE_WAIT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    pub kind: ProxyKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueueLen {
    pub len: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PopRequest {
    /// Milliseconds to wait for an item; capped at [`MAX_REMOTE_WAIT_MS`].
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaitRequest {
    pub threshold: i64,
    /// Seconds; negative values are rejected by the queue.
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaitResponse {
    pub waited_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: serde_json::Value,
}

use crate::progress::ProgressEvent;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// RPC methods exposed by the per-project daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Index,
    Query,
    QueryFts,
    QueryHybrid,
    ClearCache,
    Status,
    Shutdown,
}

/// A single request frame on the daemon socket.
///
/// `params` is method-specific; `session_id` carries the optional MCP
/// session this call belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: Method,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A response frame. Long-running methods may emit any number of
/// `progress` frames before the final `result` or `error` frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
}

impl Response {
    #[must_use]
    pub fn success(id: Option<u64>, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn failure(id: Option<u64>, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
            progress: None,
        }
    }

    #[must_use]
    pub fn progress_update(id: Option<u64>, event: ProgressEvent) -> Self {
        Self {
            id,
            result: None,
            error: None,
            progress: Some(event),
        }
    }

    /// True when this frame terminates the call.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// Error kinds surfaced over RPC, mirroring the engine's failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    InvalidInput,
    FingerprintMismatch,
    DimensionMismatch,
    CollectionMissing,
    CacheExpired,
    ProviderFailed,
    CorruptArtifact,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    #[must_use]
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_round_trips_through_json() {
        let request = Request {
            id: Some(7),
            method: Method::Query,
            params: serde_json::json!({"query": "parser", "limit": 10}),
            session_id: Some("mcp-1".to_string()),
        };
        let raw = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.id, Some(7));
        assert_eq!(back.method, Method::Query);
        assert_eq!(back.session_id.as_deref(), Some("mcp-1"));
    }

    #[test]
    fn progress_frames_are_not_final() {
        let frame = Response::progress_update(Some(1), ProgressEvent::status("setup"));
        assert!(!frame.is_final());
        let done = Response::success(Some(1), serde_json::json!({"ok": true}));
        assert!(done.is_final());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let raw = serde_json::to_string(&RpcErrorKind::CacheExpired).unwrap();
        assert_eq!(raw, "\"cache_expired\"");
    }
}

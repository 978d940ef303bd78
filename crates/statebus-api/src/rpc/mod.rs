//! RPC surface of the state server: request/response types, status codes
//! and the JSON frames carried over WebSocket.
//!
//! Every request frame is `{"id": n, "method": "...", "params": {...}}`.
//! The server answers with `{"id": n, "result": ...}` or
//! `{"id": n, "error": {"code": "...", "message": "..."}}`. A subscribe
//! request is answered with a stream of `{"id": n, "notification": ...}`.

mod client;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::notification::{Notification, Update};
use crate::path::Path;

pub use client::RpcClient;

// ── Status ───────────────────────────────────────────────────────────

/// Status codes returned by the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Code {
    Ok,
    InvalidArgument,
    NotFound,
    Unavailable,
    ResourceExhausted,
    Internal,
    Unimplemented,
}

/// A non-OK RPC outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RpcStatus {
    pub code: Code,
    pub message: String,
}

impl RpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }
}

// ── Get ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    #[serde(default)]
    pub path: Vec<Path>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    pub notification: Vec<Notification>,
}

// ── Set ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace: Vec<Update>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<Update>,
}

impl SetRequest {
    /// No deletes, replaces or updates.
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.replace.is_empty() && self.update.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateOperation {
    Delete,
    Replace,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub path: Path,
    pub op: UpdateOperation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    /// Server time of the commit, nanoseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub response: Vec<UpdateResult>,
}

// ── Subscribe ────────────────────────────────────────────────────────

/// Stream a target's running configuration as it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSubscribeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
}

// ── Frames ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    Get(GetRequest),
    Set(SetRequest),
    Subscribe(ConfigSubscribeRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: RpcRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResponse {
    Get(GetResponse),
    Set(SetResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseBody {
    Result(RpcResponse),
    Error(RpcStatus),
    Notification(Notification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_wire_form() {
        let frame = RequestFrame {
            id: 3,
            request: RpcRequest::Get(GetRequest {
                prefix: Some(Path::root().with_target("default/leaf1")),
                path: vec![],
            }),
        };
        insta::assert_snapshot!(
            serde_json::to_string(&frame).unwrap(),
            @r#"{"id":3,"method":"get","params":{"prefix":{"target":"default/leaf1"},"path":[]}}"#
        );
    }

    #[test]
    fn request_frame_parses() {
        let raw = r#"{"id":9,"method":"set","params":{"delete":[{"elem":[{"name":"a"}]}]}}"#;
        let frame: RequestFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.id, 9);
        let RpcRequest::Set(set) = frame.request else {
            panic!("expected set request");
        };
        assert_eq!(set.delete.len(), 1);
        assert!(set.replace.is_empty());
    }

    #[test]
    fn error_frame_wire_form() {
        let frame = ResponseFrame {
            id: 1,
            body: ResponseBody::Error(RpcStatus::resource_exhausted("max number of unary RPC reached")),
        };
        insta::assert_snapshot!(
            serde_json::to_string(&frame).unwrap(),
            @r#"{"id":1,"error":{"code":"ResourceExhausted","message":"max number of unary RPC reached"}}"#
        );
    }

    #[test]
    fn status_display() {
        assert_eq!(
            RpcStatus::unavailable("cache not ready").to_string(),
            "Unavailable: cache not ready"
        );
    }

    #[test]
    fn empty_set_request() {
        assert!(SetRequest::default().is_empty());
    }
}

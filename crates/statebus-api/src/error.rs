use thiserror::Error;

use crate::rpc::Code;

/// Top-level error type for the `statebus-api` crate.
///
/// Covers every wire-level failure mode: path and filter parsing, the
/// device transport, the message bus and the RPC client.
/// `statebus-core` wraps these with the operation that produced them.
#[derive(Debug, Error)]
pub enum Error {
    // ── Paths & subjects ────────────────────────────────────────────
    /// An xpath-style path could not be parsed.
    #[error("malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    /// A bus filter expression could not be parsed.
    #[error("malformed filter expression '{expression}': {reason}")]
    MalformedExpression { expression: String, reason: String },

    // ── Transport ───────────────────────────────────────────────────
    /// Connecting to the target device failed.
    #[error("cannot dial target at {address}: {reason}")]
    Dial { address: String, reason: String },

    /// Connecting to the target device did not finish in time.
    #[error("dialing {address} timed out after {timeout_ms}ms")]
    DialTimeout { address: String, timeout_ms: u64 },

    /// The subscription request was refused or could not be sent.
    #[error("subscribe failed: {reason}")]
    Subscribe { reason: String },

    /// The device ended the notification stream.
    #[error("notification stream closed by target")]
    StreamClosed,

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ── Message bus ─────────────────────────────────────────────────
    /// The bus refused or dropped the connection.
    #[error("cannot connect to message bus: {reason}")]
    BusConnect { reason: String },

    /// The bus connection was closed while in use.
    #[error("message bus connection closed")]
    BusClosed,

    /// Durable stream creation failed for a reason other than "already exists".
    #[error("cannot create stream '{name}': {reason}")]
    StreamCreate { name: String, reason: String },

    /// No stream is bound to the subject being published.
    #[error("no stream matches subject '{subject}'")]
    NoStreamForSubject { subject: String },

    /// Publishing a message failed.
    #[error("publish to '{subject}' failed: {reason}")]
    Publish { subject: String, reason: String },

    // ── RPC client ──────────────────────────────────────────────────
    /// The server answered with a non-OK status.
    #[error("{code}: {message}")]
    Rpc { code: Code, message: String },

    /// The server closed the RPC connection.
    #[error("RPC connection closed")]
    ConnectionClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON decoding failed, with the raw body for debugging.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` for failures a retry loop should ride out.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Dial { .. }
                | Self::DialTimeout { .. }
                | Self::StreamClosed
                | Self::WebSocket(_)
                | Self::BusConnect { .. }
                | Self::BusClosed
                | Self::Publish { .. }
                | Self::ConnectionClosed
                | Self::Io(_)
        )
    }

    /// Returns `true` for caller input errors (malformed paths and filters).
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedPath { .. } | Self::MalformedExpression { .. }
        )
    }

    pub(crate) fn malformed_path(path: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPath {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::StreamClosed.is_transient());
        assert!(Error::BusClosed.is_transient());
        assert!(!Error::malformed_path("/a[", "unbalanced").is_transient());
    }

    #[test]
    fn rpc_error_display_includes_code() {
        let err = Error::Rpc {
            code: Code::NotFound,
            message: "target not found".into(),
        };
        assert_eq!(err.to_string(), "NotFound: target not found");
    }
}

// ── Core error types ──
//
// Errors surfaced by the collector, config store, validator and server.
// Transport and bus failures arrive as `statebus_api::Error` and are
// translated into domain variants by the `From` impl below. Layer
// boundaries wrap their cause so callers see the whole chain.

use statebus_api::rpc::{Code, RpcStatus};
use thiserror::Error;

use crate::schema::SchemaError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("cannot connect to target at {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("target connection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("subscription rejected: {reason}")]
    SubscribeFailed { reason: String },

    #[error("target stream closed")]
    StreamClosed,

    #[error("message bus unavailable: {reason}")]
    Bus { reason: String },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("target not found: {target}")]
    TargetNotFound { target: String },

    #[error("cache not ready")]
    NotReady,

    #[error("unknown schema: {name}")]
    UnknownSchema { name: String },

    // ── Request errors ───────────────────────────────────────────────
    #[error("{message}")]
    InvalidArgument { message: String },

    #[error("validation failed for target {target}")]
    Validation {
        target: String,
        #[source]
        source: SchemaError,
    },

    #[error("max number of {limit} reached")]
    ResourceExhausted { limit: &'static str },

    // ── Operation context ────────────────────────────────────────────
    #[error("reconcile target {target}")]
    Reconcile {
        target: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("start collector for {target}")]
    Start {
        target: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("cannot listen on {address}: {reason}")]
    Bind { address: String, reason: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("{message}")]
    Api { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn reconcile(target: impl Into<String>, source: CoreError) -> Self {
        Self::Reconcile {
            target: target.into(),
            source: Box::new(source),
        }
    }

    /// Render this error and every source beneath it, outermost first.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }

    /// Status code for the RPC surface.
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidArgument { .. } => Code::InvalidArgument,
            Self::TargetNotFound { .. } | Self::UnknownSchema { .. } => Code::NotFound,
            Self::NotReady | Self::Bus { .. } => Code::Unavailable,
            Self::ResourceExhausted { .. } => Code::ResourceExhausted,
            _ => Code::Internal,
        }
    }

    /// Convert into an RPC status carrying the full causal chain.
    pub fn to_status(&self) -> RpcStatus {
        RpcStatus::new(self.code(), self.chain())
    }
}

impl From<CoreError> for RpcStatus {
    fn from(err: CoreError) -> Self {
        err.to_status()
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<statebus_api::Error> for CoreError {
    fn from(err: statebus_api::Error) -> Self {
        use statebus_api::Error as Api;

        match err {
            Api::MalformedPath { .. } | Api::MalformedExpression { .. } => {
                CoreError::InvalidArgument {
                    message: err.to_string(),
                }
            }
            Api::Dial { address, reason } => CoreError::ConnectionFailed { address, reason },
            Api::DialTimeout { timeout_ms, .. } => CoreError::Timeout { timeout_ms },
            Api::Subscribe { reason } => CoreError::SubscribeFailed { reason },
            Api::StreamClosed => CoreError::StreamClosed,
            Api::BusConnect { .. }
            | Api::BusClosed
            | Api::StreamCreate { .. }
            | Api::NoStreamForSubject { .. }
            | Api::Publish { .. } => CoreError::Bus {
                reason: err.to_string(),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("deserialization error: {message}"))
            }
            other => CoreError::Api {
                message: other.to_string(),
            },
        }
    }
}

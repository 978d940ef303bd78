//! Durable message bus.
//!
//! A [`BusConnector`] opens [`BusConnection`]s; a connection can look up
//! and create durable streams and publish messages onto subjects bound to
//! a stream. [`MemoryBus`] keeps streams in process, [`FileBus`] appends
//! them to JSON-lines files.

mod file;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub use file::FileBus;
pub use memory::{MemoryBus, StoredMessage};

/// Reserved name of the state stream.
pub const DEFAULT_STREAM: &str = "nddpstate";

// ── Stream metadata ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    /// Subject filters bound to this stream.
    pub subjects: Vec<String>,
}

impl StreamConfig {
    /// A stream capturing every subject below its own name (`<name>.>`).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let subjects = vec![format!("{name}.>")];
        Self { name, subjects }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub config: StreamConfig,
    pub created: DateTime<Utc>,
    /// Messages currently stored.
    pub messages: u64,
}

/// Acknowledgement for one stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
}

// ── Traits ───────────────────────────────────────────────────────────

/// Opens connections to the bus.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, Error>;
}

/// One live bus connection.
///
/// After any error the connection should be considered unusable and a
/// new one opened.
#[async_trait]
pub trait BusConnection: Send {
    /// Look up a stream by name. `Ok(None)` when it does not exist.
    async fn stream_info(&mut self, name: &str) -> Result<Option<StreamInfo>, Error>;

    /// Create a stream.
    async fn add_stream(&mut self, config: &StreamConfig) -> Result<StreamInfo, Error>;

    /// Store `payload` on the stream bound to `subject`.
    async fn publish(&mut self, subject: &str, payload: Bytes) -> Result<PublishAck, Error>;
}

/// Create the stream unless a stream with that name already exists.
pub async fn ensure_stream(
    conn: &mut dyn BusConnection,
    config: &StreamConfig,
) -> Result<StreamInfo, Error> {
    if let Some(info) = conn.stream_info(&config.name).await? {
        return Ok(info);
    }
    tracing::info!(stream = %config.name, subjects = ?config.subjects, "creating stream");
    conn.add_stream(config).await
}

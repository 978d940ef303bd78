//! Device transport: dialing a target and opening notification streams.
//!
//! The collector only sees the [`TargetDialer`] / [`TargetClient`] pair.
//! Two implementations ship with the crate:
//!
//! - [`WsDialer`]: JSON-encoded subscription messages over WebSocket.
//! - [`LoopbackDialer`]: in-process devices driven from the same program,
//!   used by tests and local demos.

mod loopback;
mod ws;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use secrecy::SecretString;

use crate::error::Error;
use crate::notification::{SubscribeRequest, SubscribeResponse};

pub use loopback::{LoopbackDevice, LoopbackDialer};
pub use ws::WsDialer;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_RETRY_TIMER: Duration = Duration::from_secs(10);

/// Stream of responses on one open subscription.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Result<SubscribeResponse, Error>> + Send>>;

// ── TargetConfig ─────────────────────────────────────────────────────

/// Connection parameters for one target device.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    /// Target identifier (`namespace/name`).
    pub name: String,
    /// `host:port` or a full `ws://` / `wss://` URL.
    pub address: String,
    pub timeout: Duration,
    /// Receive buffer size (notifications held between transport and session).
    pub buffer_size: usize,
    pub retry_timer: Duration,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            retry_timer: DEFAULT_RETRY_TIMER,
            username: None,
            password: None,
        }
    }

    /// Replace zero values with the defaults.
    pub fn normalized(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        if self.retry_timer.is_zero() {
            self.retry_timer = DEFAULT_RETRY_TIMER;
        }
        self
    }
}

// ── Traits ───────────────────────────────────────────────────────────

/// Creates connected clients for target devices.
#[async_trait]
pub trait TargetDialer: Send + Sync {
    /// Connect to the target. Failures are returned to the caller, never retried here.
    async fn dial(&self, config: &TargetConfig) -> Result<Box<dyn TargetClient>, Error>;
}

/// A connected target.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Send a subscription request and return the response stream.
    ///
    /// May be called again after a stream fails to resubscribe.
    async fn subscribe(&self, request: SubscribeRequest) -> Result<NotificationStream, Error>;

    /// Release the connection.
    async fn close(&self) {}
}

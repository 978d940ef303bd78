// ── Runtime configuration ──
//
// These types describe how the collector and server behave. They never
// touch disk: the binary loads a file and hands these in.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use statebus_api::bus::DEFAULT_STREAM;
use strum::{Display, EnumString};

use crate::schema::STATE_SCHEMA;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_UNARY: usize = 1024;
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 64;

/// Whether target sessions share one bus producer or each get their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProducerMode {
    #[default]
    PerSession,
    Shared,
}

/// Collector tuning.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Durable stream name, also the first subject token.
    pub stream: String,
    pub producer_mode: ProducerMode,
    /// Queue size of the shared producer. Dedicated producers use the
    /// target's buffer size.
    pub queue_capacity: usize,
    /// Retry timer for targets that do not set their own: the delay
    /// before a failed receive loop runs again.
    pub retry_delay: Duration,
    /// Fixed backoff between bus connection attempts.
    pub bus_reconnect_delay: Duration,
    /// Schema used for new config entries.
    pub schema: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            stream: DEFAULT_STREAM.into(),
            producer_mode: ProducerMode::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_delay: DEFAULT_RETRY_DELAY,
            bus_reconnect_delay: DEFAULT_RETRY_DELAY,
            schema: STATE_SCHEMA.into(),
        }
    }
}

/// RPC server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Concurrent unary calls (Get/Set) before ResourceExhausted.
    pub max_unary: usize,
    /// Concurrent config subscriptions.
    pub max_subscriptions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9999)),
            max_unary: DEFAULT_MAX_UNARY,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
        }
    }
}

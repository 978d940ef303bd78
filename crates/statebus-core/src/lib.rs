//! Collector, config store and RPC front between `statebus-api` and the
//! `statebus` binary.
//!
//! - **[`CollectorRegistry`]**: one [`TargetSession`] per target with
//!   state entries. Sessions subscribe to the device, translate every
//!   notification into [`BusMessage`]s and hand them to a [`BusProducer`]
//!   publishing onto the durable `nddpstate` stream.
//!
//! - **[`ConfigStore`]**: per-target running configs ([`ConfigEntry`])
//!   holding the requested [`StateEntry`] list. Readers take `Arc`
//!   snapshots or subscribe through a `watch` channel.
//!
//! - **[`validator`]**: validate-then-commit mutation of a config entry
//!   against its [`SchemaService`].
//!
//! - **[`StateServer`]**: Get, Set and config subscriptions with bounded
//!   concurrency, served as JSON frames over WebSocket.

pub mod collector;
pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod server;
pub mod store;
pub mod validator;

// ── Primary re-exports ──────────────────────────────────────────────
pub use collector::{
    BusProducer, CollectorRegistry, Publisher, SessionSettings, SessionState, Subscription,
    TargetDirectory, TargetSession, notification_to_messages,
};
pub use config::{CollectorConfig, ProducerMode, ServerConfig};
pub use error::CoreError;
pub use model::{BusMessage, Operation, StateDevice, StateEntry, TargetId};
pub use schema::{SchemaError, SchemaRegistry, SchemaService, StateSchema};
pub use server::{ConfigSubscription, Observation, StateServer};
pub use store::{ConfigEntry, ConfigStore, ConfigStream};

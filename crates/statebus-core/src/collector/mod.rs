//! Target collection.
//!
//! A [`CollectorRegistry`] owns one [`TargetSession`] per active target.
//! Each session keeps a subscription open on its device, turns every
//! notification into [`BusMessage`](crate::model::BusMessage)s and hands
//! them to a [`BusProducer`], which publishes them onto the durable state
//! stream.
//!
//! Reconciling a target always stops its current session before starting
//! a new one built from the target's current state entries.

mod directory;
mod handler;
mod producer;
mod registry;
mod session;
mod subscription;

pub use directory::TargetDirectory;
pub use handler::notification_to_messages;
pub use producer::BusProducer;
pub use registry::CollectorRegistry;
pub use session::{Publisher, SessionSettings, SessionState, TargetSession};
pub use subscription::{SUBSCRIPTION_NAME, Subscription};

// ── Domain model ──
//
// Canonical types shared by the collector, store and server.

mod message;
mod state;
mod target_id;

pub use message::{BusMessage, Operation, now_nanos};
pub use state::{StateDevice, StateEntry};
pub use target_id::TargetId;

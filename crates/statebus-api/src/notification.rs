// ── Subscription protocol messages ──
//
// Requests sent to a target device and the notifications it streams back.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::path::Path;
use crate::value::TypedValue;

// ── Updates & notifications ─────────────────────────────────────────

/// One updated leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub path: Path,
    pub val: TypedValue,
}

impl Update {
    pub fn new(path: Path, val: TypedValue) -> Self {
        Self { path, val }
    }
}

/// A timestamped batch of updates and deletes scoped by an optional prefix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<Update>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<Path>,
}

/// Messages streamed back on an open subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeResponse {
    Update(Notification),
    /// End of the initial state dump.
    SyncResponse,
}

// ── Subscription requests ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ListMode {
    #[default]
    Stream,
    Once,
    Poll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionMode {
    #[default]
    OnChange,
    Sample,
    TargetDefined,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    Json,
    JsonIetf,
    #[default]
    Ascii,
    Proto,
    Bytes,
}

/// One path to stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    pub path: Path,
    #[serde(default)]
    pub mode: SubscriptionMode,
}

/// The request a session sends when it opens a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<Path>,
    pub subscription: Vec<SubscriptionEntry>,
    #[serde(default)]
    pub mode: ListMode,
    #[serde(default)]
    pub encoding: Encoding,
}

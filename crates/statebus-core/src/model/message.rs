// ── Bus messages ──

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::Utc;
use serde::{Serialize, Serializer};
use strum::Display;

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Update,
    Delete,
}

/// One change destined for the bus.
///
/// The subject addresses the message; the JSON body carries the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusMessage {
    #[serde(skip)]
    pub subject: String,
    pub timestamp: i64,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Bytes::is_empty", serialize_with = "serialize_data")]
    pub data: Bytes,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl BusMessage {
    pub fn update(subject: impl Into<String>, timestamp: i64, data: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            timestamp,
            operation: Operation::Update,
            data: data.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn delete(subject: impl Into<String>, timestamp: i64) -> Self {
        Self {
            subject: subject.into(),
            timestamp,
            operation: Operation::Delete,
            data: Bytes::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// JSON body published on the bus.
    pub fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

// values are textual on the bus; invalid UTF-8 is replaced rather than rejected
fn serialize_data<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

// ── Subscription ──

use statebus_api::Path;
use statebus_api::notification::{
    Encoding, ListMode, SubscribeRequest, SubscriptionEntry, SubscriptionMode,
};

use crate::model::StateEntry;

pub const SUBSCRIPTION_NAME: &str = "target-collector";

/// The paths one session streams, derived from the target's state entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    name: String,
    paths: Vec<Path>,
}

impl Subscription {
    /// Collect every entry's paths in entry order. Paths that do not parse
    /// are logged and skipped.
    pub fn from_entries(entries: &[StateEntry]) -> Self {
        let mut paths = Vec::new();
        for entry in entries {
            for path in entry.structured_paths() {
                match path {
                    Ok(path) => paths.push(path),
                    Err(e) => {
                        tracing::warn!(entry = %entry.name, error = %e, "skipping state entry path");
                    }
                }
            }
        }
        Self {
            name: SUBSCRIPTION_NAME.into(),
            paths,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Streaming, on-change, ASCII-encoded subscription for every path.
    pub fn request(&self) -> SubscribeRequest {
        SubscribeRequest {
            prefix: None,
            subscription: self
                .paths
                .iter()
                .map(|path| SubscriptionEntry {
                    path: path.clone(),
                    mode: SubscriptionMode::OnChange,
                })
                .collect(),
            mode: ListMode::Stream,
            encoding: Encoding::Ascii,
        }
    }
}

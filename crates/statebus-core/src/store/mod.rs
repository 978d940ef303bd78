// ── Config store ──
//
// Per-target running configs behind one reader/writer lock. The lock
// guards the map only; trees are mutated through their own entry.

mod entry;
mod stream;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub use entry::ConfigEntry;
pub use stream::{ConfigStream, ConfigWatchStream};

use crate::error::CoreError;
use crate::model::TargetId;
use crate::schema::SchemaService;

/// The per-target running-config cache.
#[derive(Debug)]
pub struct ConfigStore {
    schema: Arc<dyn SchemaService>,
    entries: RwLock<HashMap<TargetId, Arc<ConfigEntry>>>,
    ready: AtomicBool,
}

impl ConfigStore {
    /// An empty, not-yet-ready store whose entries use `schema`.
    pub fn new(schema: Arc<dyn SchemaService>) -> Self {
        Self {
            schema,
            entries: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn has_target(&self, target: &TargetId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(target)
    }

    pub fn get(&self, target: &TargetId) -> Result<Arc<ConfigEntry>, CoreError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
            .ok_or_else(|| CoreError::TargetNotFound {
                target: target.to_string(),
            })
    }

    /// Install an empty entry for `target`, replacing any existing one.
    pub fn add(&self, target: TargetId) -> Arc<ConfigEntry> {
        let entry = Arc::new(ConfigEntry::new(target.clone(), Arc::clone(&self.schema)));
        tracing::debug!(%target, "config entry added");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, Arc::clone(&entry));
        entry
    }

    /// The entry for `target`, created empty if absent.
    pub fn get_or_add(&self, target: &TargetId) -> Arc<ConfigEntry> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(target.clone()).or_insert_with(|| {
            tracing::debug!(%target, "config entry added");
            Arc::new(ConfigEntry::new(target.clone(), Arc::clone(&self.schema)))
        }))
    }

    pub fn delete(&self, target: &TargetId) -> Option<Arc<ConfigEntry>> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
        if removed.is_some() {
            tracing::debug!(%target, "config entry deleted");
        }
        removed
    }

    /// Every target with an entry, sorted.
    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        targets.sort();
        targets
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

// ── Per-target running config ──

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;

use super::stream::ConfigStream;
use crate::error::CoreError;
use crate::model::{StateDevice, TargetId};
use crate::schema::SchemaService;

/// The running config of one target plus the schema it conforms to.
///
/// Readers take cheap `Arc` snapshots. Writers hold the write lock for the
/// whole validate-then-commit sequence, so a committed tree is always one
/// that passed validation.
pub struct ConfigEntry {
    target: TargetId,
    schema: Arc<dyn SchemaService>,
    running: watch::Sender<Arc<Value>>,
    write: Mutex<()>,
}

impl std::fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigEntry")
            .field("target", &self.target)
            .field("schema", &self.schema.name())
            .finish_non_exhaustive()
    }
}

impl ConfigEntry {
    pub fn new(target: TargetId, schema: Arc<dyn SchemaService>) -> Self {
        let (running, _) = watch::channel(Arc::new(schema.new_tree()));
        Self {
            target,
            schema,
            running,
            write: Mutex::new(()),
        }
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn schema(&self) -> &dyn SchemaService {
        self.schema.as_ref()
    }

    /// Current running config.
    pub fn running(&self) -> Arc<Value> {
        self.running.borrow().clone()
    }

    /// Serialized running config.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self.running().as_ref()).map_err(|e| {
            tracing::error!(target = %self.target, error = %e, "cannot serialize running config");
            CoreError::Internal(format!("serialize running config of {}: {e}", self.target))
        })
    }

    /// Watch the running config, starting with the current tree.
    pub fn subscribe(&self) -> ConfigStream {
        ConfigStream::new(self.running.subscribe())
    }

    /// Typed view of the running config.
    pub fn state_device(&self) -> Result<StateDevice, CoreError> {
        StateDevice::from_tree(&self.running())
    }

    pub fn is_empty(&self) -> bool {
        self.running().as_object().is_none_or(serde_json::Map::is_empty)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.write.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a validated tree. Callers must hold [`lock`](Self::lock).
    pub(crate) fn commit(&self, tree: Value) {
        self.running.send_replace(Arc::new(tree));
    }
}

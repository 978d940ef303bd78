// ── Target directory ──

use dashmap::DashMap;
use statebus_api::transport::TargetConfig;

use crate::model::TargetId;

/// Connection parameters for every known target.
#[derive(Debug, Default)]
pub struct TargetDirectory {
    targets: DashMap<TargetId, TargetConfig>,
}

impl TargetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a target. Zero durations and sizes are
    /// replaced by their defaults.
    pub fn insert(&self, config: TargetConfig) {
        let id = TargetId::new(config.name.clone());
        tracing::debug!(target = %id, address = %config.address, "target registered");
        self.targets.insert(id, config.normalized());
    }

    pub fn remove(&self, target: &TargetId) -> Option<TargetConfig> {
        self.targets.remove(target).map(|(_, config)| config)
    }

    pub fn get(&self, target: &TargetId) -> Option<TargetConfig> {
        self.targets.get(target).map(|config| config.value().clone())
    }

    pub fn contains(&self, target: &TargetId) -> bool {
        self.targets.contains_key(target)
    }

    /// Every registered target, sorted.
    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self.targets.iter().map(|e| e.key().clone()).collect();
        targets.sort();
        targets
    }
}

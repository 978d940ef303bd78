// ── Collector registry ──
//
// Owns at most one session per target. The slot map is guarded by a
// plain mutex held only for lookups; each slot carries its own async
// mutex, held across stop/start so reconciles of one target never
// interleave while different targets proceed in parallel. A slot left
// without a session is dropped from the map once nobody else holds it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use statebus_api::bus::{BusConnector, StreamConfig};
use statebus_api::transport::{TargetConfig, TargetDialer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::producer::BusProducer;
use super::session::{Publisher, SessionSettings, SessionState, TargetSession};
use super::subscription::Subscription;
use crate::config::{CollectorConfig, ProducerMode};
use crate::error::CoreError;
use crate::model::{BusMessage, TargetId};
use crate::store::ConfigStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct TargetSlot {
    session: tokio::sync::Mutex<Option<TargetSession>>,
    active: AtomicBool,
}

struct SharedProducer {
    tx: mpsc::Sender<BusMessage>,
    handle: JoinHandle<()>,
}

// ── CollectorRegistry ────────────────────────────────────────────────

/// Starts, restarts and stops target sessions.
///
/// Cheaply cloneable via `Arc<RegistryInner>`.
#[derive(Clone)]
pub struct CollectorRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: CollectorConfig,
    dialer: Arc<dyn TargetDialer>,
    connector: Arc<dyn BusConnector>,
    store: Arc<ConfigStore>,
    slots: Mutex<HashMap<TargetId, Arc<TargetSlot>>>,
    shared: Mutex<Option<SharedProducer>>,
    cancel: CancellationToken,
}

impl CollectorRegistry {
    pub fn new(
        config: CollectorConfig,
        dialer: Arc<dyn TargetDialer>,
        connector: Arc<dyn BusConnector>,
        store: Arc<ConfigStore>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                dialer,
                connector,
                store,
                slots: Mutex::new(HashMap::new()),
                shared: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.inner.store
    }

    /// Whether a session is running for `target`.
    pub fn is_active(&self, target: &TargetId) -> bool {
        lock(&self.inner.slots)
            .get(target)
            .is_some_and(|slot| slot.active.load(Ordering::Acquire))
    }

    /// Targets with a running session, sorted.
    pub fn active_targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = lock(&self.inner.slots)
            .iter()
            .filter(|(_, slot)| slot.active.load(Ordering::Acquire))
            .map(|(target, _)| target.clone())
            .collect();
        targets.sort();
        targets
    }

    /// State of the target's session, if it has one.
    pub async fn session_state(&self, target: &TargetId) -> Option<SessionState> {
        let slot = lock(&self.inner.slots).get(target).cloned()?;
        let session = slot.session.lock().await;
        session.as_ref().map(TargetSession::state)
    }

    // ── Reconcile ────────────────────────────────────────────────────

    /// Make the target's session match its current state entries.
    ///
    /// Any running session is stopped first. With no state entries (or no
    /// config entry at all) the target is left without a session;
    /// otherwise a new session is started from the current entries.
    pub async fn reconcile_target(&self, config: &TargetConfig) -> Result<(), CoreError> {
        let target = TargetId::new(config.name.clone());
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::reconcile(
                target.as_str(),
                CoreError::Internal("collector registry is stopped".into()),
            ));
        }

        let slot = self.slot(&target);
        let mut session = slot.session.lock().await;

        if let Some(mut old) = session.take() {
            slot.active.store(false, Ordering::Release);
            old.stop().await;
        }

        let entries = match self.inner.store.get(&target) {
            Ok(entry) => {
                entry
                    .state_device()
                    .map_err(|e| CoreError::reconcile(target.as_str(), e))?
                    .state_entry
            }
            Err(CoreError::TargetNotFound { .. }) => Vec::new(),
            Err(e) => return Err(CoreError::reconcile(target.as_str(), e)),
        };
        if entries.is_empty() {
            tracing::debug!(%target, "no state entries, collector not running");
            drop(session);
            self.release_slot(&target, slot);
            return Ok(());
        }

        let subscription = Subscription::from_entries(&entries);
        let started = match TargetSession::start(
            config,
            &subscription,
            self.inner.dialer.as_ref(),
            self.publisher(),
            SessionSettings::new(self.inner.config.stream.clone(), config),
            &self.inner.cancel,
        )
        .await
        {
            Ok(started) => started,
            Err(e) => {
                drop(session);
                self.release_slot(&target, slot);
                return Err(CoreError::reconcile(target.as_str(), e));
            }
        };

        *session = Some(started);
        slot.active.store(true, Ordering::Release);
        tracing::info!(%target, entries = entries.len(), "target reconciled");
        Ok(())
    }

    /// Stop the target's session. Unknown or already stopped targets are
    /// not an error.
    pub async fn stop_target(&self, target: &TargetId) -> Result<(), CoreError> {
        let Some(slot) = lock(&self.inner.slots).get(target).cloned() else {
            return Ok(());
        };
        let mut session = slot.session.lock().await;
        slot.active.store(false, Ordering::Release);
        if let Some(mut old) = session.take() {
            old.stop().await;
        }
        drop(session);
        self.release_slot(target, slot);
        Ok(())
    }

    /// Stop every session and the shared producer. Used at shutdown;
    /// later reconciles fail.
    pub async fn stop(&self) -> Result<(), CoreError> {
        self.inner.cancel.cancel();

        let slots: Vec<(TargetId, Arc<TargetSlot>)> = lock(&self.inner.slots)
            .iter()
            .map(|(target, slot)| (target.clone(), Arc::clone(slot)))
            .collect();
        for (target, slot) in slots {
            let mut session = slot.session.lock().await;
            slot.active.store(false, Ordering::Release);
            if let Some(mut old) = session.take() {
                tracing::debug!(%target, "stopping collector");
                old.stop().await;
            }
        }

        let shared = lock(&self.inner.shared).take();
        if let Some(shared) = shared {
            drop(shared.tx);
            if let Err(e) = shared.handle.await {
                tracing::warn!(error = %e, "shared producer task failed");
            }
        }
        tracing::info!("collector registry stopped");
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    fn slot(&self, target: &TargetId) -> Arc<TargetSlot> {
        Arc::clone(lock(&self.inner.slots).entry(target.clone()).or_default())
    }

    /// Drop an idle slot. Kept while another caller holds a clone (it is
    /// waiting on or about to take the session lock) or a session runs.
    fn release_slot(&self, target: &TargetId, slot: Arc<TargetSlot>) {
        let mut slots = lock(&self.inner.slots);
        let idle = slots.get(target).is_some_and(|current| {
            Arc::ptr_eq(current, &slot)
                && Arc::strong_count(&slot) == 2
                && slot.session.try_lock().is_ok_and(|session| session.is_none())
        });
        if idle {
            slots.remove(target);
        }
    }

    fn producer(&self) -> BusProducer {
        BusProducer::new(
            Arc::clone(&self.inner.connector),
            StreamConfig::new(self.inner.config.stream.clone()),
            self.inner.config.bus_reconnect_delay,
        )
    }

    fn publisher(&self) -> Publisher {
        match self.inner.config.producer_mode {
            ProducerMode::PerSession => Publisher::Dedicated(self.producer()),
            ProducerMode::Shared => {
                let mut shared = lock(&self.inner.shared);
                let shared = shared.get_or_insert_with(|| {
                    tracing::debug!(capacity = self.inner.config.queue_capacity, "starting shared producer");
                    let (tx, handle) = self
                        .producer()
                        .spawn(self.inner.config.queue_capacity, self.inner.cancel.child_token());
                    SharedProducer { tx, handle }
                });
                Publisher::Shared(shared.tx.clone())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use statebus_api::bus::MemoryBus;
    use statebus_api::transport::LoopbackDialer;
    use statebus_api::{Notification, Path, TypedValue, Update};

    use super::*;
    use crate::schema::{ApplyMode, StateSchema};
    use crate::validator::{Origin, validate_update};

    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        dialer: LoopbackDialer,
        bus: MemoryBus,
        store: Arc<ConfigStore>,
        registry: CollectorRegistry,
    }

    fn fixture(mode: ProducerMode) -> Fixture {
        let dialer = LoopbackDialer::new();
        let bus = MemoryBus::new();
        let store = Arc::new(ConfigStore::new(Arc::new(StateSchema::new())));
        let config = CollectorConfig {
            producer_mode: mode,
            bus_reconnect_delay: Duration::from_millis(10),
            ..CollectorConfig::default()
        };
        let registry = CollectorRegistry::new(
            config,
            Arc::new(dialer.clone()),
            Arc::new(bus.clone()),
            Arc::clone(&store),
        );
        Fixture {
            dialer,
            bus,
            store,
            registry,
        }
    }

    fn target(name: &str) -> TargetConfig {
        let mut config = TargetConfig::new(format!("default/{name}"), format!("{name}:57400"));
        config.retry_timer = Duration::from_millis(20);
        config
    }

    fn set_entries(store: &ConfigStore, config: &TargetConfig, paths: &[&str]) {
        let entry = store.get_or_add(&TargetId::new(config.name.clone()));
        let update = Update::new(
            Path::from_xpath("/state-entry[name=collect]").unwrap(),
            TypedValue::json_ietf(&json!({"path": paths})),
        );
        validate_update(&entry, &[update], ApplyMode::Replace, Origin::Controller).unwrap();
    }

    fn clear_entries(store: &ConfigStore, config: &TargetConfig) {
        let entry = store.get(&TargetId::new(config.name.clone())).unwrap();
        crate::validator::validate_delete(&entry, &[Path::root()], Origin::Controller).unwrap();
    }

    #[tokio::test]
    async fn reconcile_follows_state_entries() {
        let f = fixture(ProducerMode::PerSession);
        let leaf1 = target("leaf1");
        let id = TargetId::new("default/leaf1");
        let device = f.dialer.device("leaf1:57400");

        set_entries(&f.store, &leaf1, &["/interface"]);
        f.registry.reconcile_target(&leaf1).await.unwrap();
        assert!(f.registry.is_active(&id));
        tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();

        clear_entries(&f.store, &leaf1);
        f.registry.reconcile_target(&leaf1).await.unwrap();
        assert!(!f.registry.is_active(&id));
        assert_eq!(device.open_streams(), 0);
        assert_eq!(f.registry.session_state(&id).await, None);
    }

    #[tokio::test]
    async fn reconcile_without_config_entry_is_inactive() {
        let f = fixture(ProducerMode::PerSession);
        f.registry.reconcile_target(&target("leaf1")).await.unwrap();
        assert!(!f.registry.is_active(&TargetId::new("default/leaf1")));
        assert_eq!(f.dialer.device("leaf1:57400").dial_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_restarts_with_new_paths() {
        let f = fixture(ProducerMode::PerSession);
        let leaf1 = target("leaf1");
        let device = f.dialer.device("leaf1:57400");

        set_entries(&f.store, &leaf1, &["/interface"]);
        f.registry.reconcile_target(&leaf1).await.unwrap();
        tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();

        set_entries(&f.store, &leaf1, &["/interface", "/system"]);
        f.registry.reconcile_target(&leaf1).await.unwrap();
        tokio::time::timeout(WAIT, device.wait_for_subscriptions(2)).await.unwrap();

        let requests = device.requests();
        assert_eq!(requests[1].subscription.len(), 2);
        assert_eq!(device.dial_count(), 2);
        assert!(device.open_streams() <= 1);
    }

    #[tokio::test]
    async fn dial_failure_surfaces_with_context() {
        let f = fixture(ProducerMode::PerSession);
        let leaf1 = target("leaf1");
        f.dialer.device("leaf1:57400").set_unreachable(true);
        set_entries(&f.store, &leaf1, &["/interface"]);

        let err = f.registry.reconcile_target(&leaf1).await.unwrap_err();
        assert!(matches!(err, CoreError::Reconcile { .. }));
        assert!(err.chain().starts_with("reconcile target default/leaf1: start collector for default/leaf1"));
        assert!(!f.registry.is_active(&TargetId::new("default/leaf1")));
    }

    #[tokio::test]
    async fn stop_target_twice_is_ok() {
        let f = fixture(ProducerMode::PerSession);
        let leaf1 = target("leaf1");
        let id = TargetId::new("default/leaf1");
        set_entries(&f.store, &leaf1, &["/interface"]);
        f.registry.reconcile_target(&leaf1).await.unwrap();

        f.registry.stop_target(&id).await.unwrap();
        f.registry.stop_target(&id).await.unwrap();
        f.registry.stop_target(&TargetId::new("default/unknown")).await.unwrap();
        assert!(!f.registry.is_active(&id));
    }

    #[tokio::test]
    async fn idle_slots_are_released() {
        let f = fixture(ProducerMode::PerSession);
        let leaf1 = target("leaf1");
        let leaf2 = target("leaf2");

        set_entries(&f.store, &leaf1, &["/interface"]);
        f.registry.reconcile_target(&leaf1).await.unwrap();
        assert_eq!(lock(&f.registry.inner.slots).len(), 1);
        f.registry.stop_target(&TargetId::new("default/leaf1")).await.unwrap();
        assert!(lock(&f.registry.inner.slots).is_empty());

        // Emptied entries and failed starts leave nothing behind either.
        f.registry.reconcile_target(&leaf2).await.unwrap();
        assert!(lock(&f.registry.inner.slots).is_empty());
        f.dialer.device("leaf1:57400").set_unreachable(true);
        f.registry.reconcile_target(&leaf1).await.unwrap_err();
        assert!(lock(&f.registry.inner.slots).is_empty());

        f.dialer.device("leaf1:57400").set_unreachable(false);
        f.registry.reconcile_target(&leaf1).await.unwrap();
        assert!(f.registry.is_active(&TargetId::new("default/leaf1")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reconciles_leave_one_session() {
        let f = fixture(ProducerMode::PerSession);
        let leaf1 = target("leaf1");
        let device = f.dialer.device("leaf1:57400");
        set_entries(&f.store, &leaf1, &["/interface"]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = f.registry.clone();
                let config = leaf1.clone();
                tokio::spawn(async move { registry.reconcile_target(&config).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(f.registry.is_active(&TargetId::new("default/leaf1")));
        assert_eq!(device.dial_count(), 8);
        tokio::time::timeout(WAIT, async {
            while device.open_streams() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(device.open_streams(), 1);
        assert_eq!(f.registry.active_targets().len(), 1);
    }

    #[tokio::test]
    async fn shared_producer_serves_every_target() {
        let f = fixture(ProducerMode::Shared);
        let leaf1 = target("leaf1");
        let leaf2 = target("leaf2");
        set_entries(&f.store, &leaf1, &["/interface"]);
        set_entries(&f.store, &leaf2, &["/interface"]);
        f.registry.reconcile_target(&leaf1).await.unwrap();
        f.registry.reconcile_target(&leaf2).await.unwrap();

        for name in ["leaf1", "leaf2"] {
            let device = f.dialer.device(&format!("{name}:57400"));
            tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();
            device.notify(Notification {
                update: vec![Update::new(
                    Path::from_xpath("/system/name").unwrap(),
                    TypedValue::String(name.into()),
                )],
                ..Notification::default()
            });
        }
        tokio::time::timeout(WAIT, f.bus.wait_for_published(2)).await.unwrap();
        assert_eq!(f.bus.connect_count(), 1);
        assert_eq!(
            f.registry.active_targets(),
            vec![TargetId::new("default/leaf1"), TargetId::new("default/leaf2")]
        );

        f.registry.stop().await.unwrap();
        assert!(f.registry.active_targets().is_empty());
    }

    #[tokio::test]
    async fn reconcile_after_stop_fails() {
        let f = fixture(ProducerMode::PerSession);
        let leaf1 = target("leaf1");
        set_entries(&f.store, &leaf1, &["/interface"]);
        f.registry.stop().await.unwrap();
        assert!(f.registry.reconcile_target(&leaf1).await.is_err());
    }
}

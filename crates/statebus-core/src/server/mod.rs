//! Protocol front: Get, Set and config subscriptions over the store.
//!
//! [`StateServer`] is transport-agnostic; [`serve`](StateServer::serve)
//! exposes it as JSON frames over WebSocket. Unary calls are admitted by
//! a semaphore and fail fast with `ResourceExhausted` when it is full.

mod listener;
mod locks;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::Serialize;
use serde_json::{Map, Value};
use statebus_api::path::clean_path;
use statebus_api::rpc::{
    ConfigSubscribeRequest, GetRequest, GetResponse, SetRequest, SetResponse, UpdateOperation,
    UpdateResult,
};
use statebus_api::transport::TargetConfig;
use statebus_api::{Notification, Path, TypedValue, Update};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::collector::{CollectorRegistry, TargetDirectory};
use crate::config::ServerConfig;
use crate::error::CoreError;
use crate::model::{StateDevice, StateEntry, TargetId, now_nanos};
use crate::schema::{ApplyMode, read};
use crate::store::{ConfigStore, ConfigWatchStream};
use crate::validator::{Mutation, Origin, validate_set, validate_update};
use locks::TargetLocks;

/// Result of comparing a desired state entry with the cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// The target has a cached entry of that name.
    pub exists: bool,
    /// The cached entry equals the desired one.
    pub up_to_date: bool,
}

// ── StateServer ──────────────────────────────────────────────────────

/// RPC handlers bound to one store, registry and target directory.
///
/// Cheaply cloneable via `Arc<ServerInner>`.
#[derive(Clone)]
pub struct StateServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ServerConfig,
    store: Arc<ConfigStore>,
    registry: CollectorRegistry,
    directory: Arc<TargetDirectory>,
    unary: Semaphore,
    subscriptions: Arc<Semaphore>,
    writes: TargetLocks,
}

impl StateServer {
    pub fn new(config: ServerConfig, registry: CollectorRegistry, directory: Arc<TargetDirectory>) -> Self {
        let unary = Semaphore::new(config.max_unary);
        let subscriptions = Arc::new(Semaphore::new(config.max_subscriptions));
        Self {
            inner: Arc::new(ServerInner {
                store: Arc::clone(registry.store()),
                config,
                registry,
                directory,
                unary,
                subscriptions,
                writes: TargetLocks::default(),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.inner.registry
    }

    pub fn directory(&self) -> &Arc<TargetDirectory> {
        &self.inner.directory
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Register a target and install its configured state entries.
    ///
    /// Entries go through the validator like any Set; a non-empty set
    /// starts the target's collector.
    pub async fn seed_target(&self, config: TargetConfig, entries: &[StateEntry]) -> Result<(), CoreError> {
        let target = TargetId::new(config.name.clone());
        self.inner.directory.insert(config);
        if entries.is_empty() {
            return Ok(());
        }

        let updates: Vec<Update> = entries
            .iter()
            .map(|entry| {
                let value = serde_json::to_value(entry)
                    .map_err(|e| CoreError::Internal(format!("encode state entry: {e}")))?;
                Ok(Update::new(entry.config_path(), TypedValue::json_ietf(&value)))
            })
            .collect::<Result<_, CoreError>>()?;

        let _write = self.inner.writes.acquire(&target).await;
        let entry = self.inner.store.get_or_add(&target);
        validate_update(&entry, &updates, ApplyMode::Replace, Origin::Seed)?;
        self.reconcile(&target).await
    }

    /// Open the store for reads.
    pub fn mark_ready(&self) {
        self.inner.store.mark_ready();
        tracing::info!(targets = self.inner.store.targets().len(), "config store ready");
    }

    /// Stop every collector.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.inner.registry.stop().await
    }

    // ── Get ──────────────────────────────────────────────────────────

    /// Read subtrees of a target's running config.
    ///
    /// One notification per requested path (the whole tree when no path
    /// is given). A target without a config entry yields no notifications.
    pub async fn get(&self, request: GetRequest) -> Result<GetResponse, CoreError> {
        let _permit = self.admit_unary()?;
        if !self.inner.store.is_ready() {
            return Err(CoreError::NotReady);
        }
        let prefix = request.prefix.unwrap_or_default();
        let target = prefix_target(&prefix)?;
        tracing::debug!(%target, paths = request.path.len(), "get");

        let Ok(entry) = self.inner.store.get(&target) else {
            return Ok(GetResponse::default());
        };
        let tree = entry.running();
        let timestamp = now_nanos();

        let paths = if request.path.is_empty() {
            vec![Path::root()]
        } else {
            request.path
        };
        let mut notifications = Vec::with_capacity(paths.len());
        for path in paths {
            let full = clean_path(&scoped(&prefix, &path));
            let value = read(entry.schema(), &tree, &full).map_err(|e| {
                CoreError::invalid_argument(format!("invalid path {}: {e}", path.to_xpath()))
            })?;
            notifications.push(Notification {
                timestamp,
                prefix: Some(prefix.clone()),
                update: value
                    .map(|value| vec![Update::new(path, TypedValue::json_ietf(&value))])
                    .unwrap_or_default(),
                delete: Vec::new(),
            });
        }
        Ok(GetResponse {
            notification: notifications,
        })
    }

    // ── Set ──────────────────────────────────────────────────────────

    /// Apply deletes, replaces and updates atomically, then reconcile the
    /// target's collector with the result.
    ///
    /// Sets on one target run one at a time, from the entry lookup to the
    /// end of the reconcile.
    pub async fn set(&self, request: SetRequest) -> Result<SetResponse, CoreError> {
        let _permit = self.admit_unary()?;
        if request.is_empty() {
            return Err(CoreError::invalid_argument(
                "missing update/replace/delete path(s) in set",
            ));
        }
        let prefix = request.prefix.clone().unwrap_or_default();
        let target = prefix_target(&prefix)?;
        let response = set_response(&request);

        let creates = !request.replace.is_empty() || !request.update.is_empty();
        let _write = self.inner.writes.acquire(&target).await;
        let entry = if creates {
            if !self.inner.directory.contains(&target) {
                return Err(CoreError::TargetNotFound {
                    target: target.to_string(),
                });
            }
            self.inner.store.get_or_add(&target)
        } else {
            match self.inner.store.get(&target) {
                Ok(entry) => entry,
                Err(_) => {
                    tracing::debug!(%target, "delete on target without config, nothing to do");
                    return Ok(response);
                }
            }
        };

        let deletes: Vec<Path> = request.delete.iter().map(|p| scoped(&prefix, p)).collect();
        let replaces = scoped_updates(&prefix, &request.replace);
        let updates = scoped_updates(&prefix, &request.update);
        validate_set(
            &entry,
            Mutation {
                deletes: &deletes,
                replaces: &replaces,
                updates: &updates,
            },
            Origin::RpcServer,
        )?;

        self.reconcile(&target).await?;
        Ok(response)
    }

    // ── Subscribe ────────────────────────────────────────────────────

    /// Stream the target's running config: the current tree, then every
    /// committed change.
    pub fn subscribe(&self, request: &ConfigSubscribeRequest) -> Result<ConfigSubscription, CoreError> {
        let permit = Arc::clone(&self.inner.subscriptions)
            .try_acquire_owned()
            .map_err(|_| CoreError::ResourceExhausted {
                limit: "subscriptions",
            })?;
        let prefix = request.prefix.clone().unwrap_or_default();
        let target = prefix_target(&prefix)?;
        let entry = self.inner.store.get(&target)?;
        tracing::debug!(%target, "config subscription opened");
        Ok(ConfigSubscription {
            prefix,
            trees: entry.subscribe().into_stream(),
            _permit: permit,
        })
    }

    // ── Observe ──────────────────────────────────────────────────────

    /// Compare `desired` with the target's cached entry of the same name.
    ///
    /// A missing config entry means the cache is not ready yet and is
    /// reported as `exists = false`, never as an error.
    pub fn observe(&self, target: &TargetId, desired: &StateEntry) -> Observation {
        let missing = Observation {
            exists: false,
            up_to_date: false,
        };
        let Ok(entry) = self.inner.store.get(target) else {
            return missing;
        };
        let cached = match read(entry.schema(), &entry.running(), &desired.config_path()) {
            Ok(Some(cached)) => cached,
            Ok(None) => return missing,
            Err(e) => {
                tracing::warn!(%target, entry = %desired.name, error = %e, "cannot read cached entry");
                return missing;
            }
        };
        let Ok(desired) = serde_json::to_value(desired) else {
            return missing;
        };

        let delta = entry
            .schema()
            .diff(&single_entry_tree(cached), &single_entry_tree(desired))
            .collapse_key_leaves();
        if !delta.is_empty() {
            tracing::debug!(
                %target,
                deletes = delta.deletes.len(),
                updates = delta.updates.len(),
                "state entry differs"
            );
        }
        Observation {
            exists: true,
            up_to_date: delta.is_empty(),
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn admit_unary(&self) -> Result<tokio::sync::SemaphorePermit<'_>, CoreError> {
        self.inner
            .unary
            .try_acquire()
            .map_err(|_| CoreError::ResourceExhausted { limit: "unary RPC" })
    }

    /// Bring the collector in line with the target's entries. An entry
    /// left without state entries is dropped from the store. Callers hold
    /// the target's write guard.
    async fn reconcile(&self, target: &TargetId) -> Result<(), CoreError> {
        let device = match self.inner.store.get(target) {
            Ok(entry) => entry.state_device()?,
            Err(_) => StateDevice::default(),
        };
        if device.is_empty() {
            self.inner.registry.stop_target(target).await?;
            self.inner.store.delete(target);
            return Ok(());
        }
        let config = self
            .inner
            .directory
            .get(target)
            .ok_or_else(|| CoreError::TargetNotFound {
                target: target.to_string(),
            })?;
        self.inner.registry.reconcile_target(&config).await
    }
}

// ── ConfigSubscription ───────────────────────────────────────────────

/// Stream of running-config notifications. Holds a subscription slot
/// until dropped.
pub struct ConfigSubscription {
    prefix: Path,
    trees: ConfigWatchStream,
    _permit: OwnedSemaphorePermit,
}

impl Stream for ConfigSubscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        Pin::new(&mut this.trees).poll_next(cx).map(|tree| {
            tree.map(|tree| Notification {
                timestamp: now_nanos(),
                prefix: Some(this.prefix.clone()),
                update: vec![Update::new(Path::root(), TypedValue::json_ietf(&tree))],
                delete: Vec::new(),
            })
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn prefix_target(prefix: &Path) -> Result<TargetId, CoreError> {
    prefix
        .target
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(TargetId::from)
        .ok_or_else(|| CoreError::invalid_argument("target expected"))
}

/// `path` below the prefix elements, without the prefix's target.
fn scoped(prefix: &Path, path: &Path) -> Path {
    Path::new(prefix.elem.clone()).join(path)
}

fn scoped_updates(prefix: &Path, updates: &[Update]) -> Vec<Update> {
    updates
        .iter()
        .map(|u| Update::new(scoped(prefix, &u.path), u.val.clone()))
        .collect()
}

fn set_response(request: &SetRequest) -> SetResponse {
    let results = request
        .delete
        .iter()
        .map(|p| (p, UpdateOperation::Delete))
        .chain(request.replace.iter().map(|u| (&u.path, UpdateOperation::Replace)))
        .chain(request.update.iter().map(|u| (&u.path, UpdateOperation::Update)))
        .map(|(path, op)| UpdateResult {
            path: path.clone(),
            op,
        })
        .collect();
    SetResponse {
        prefix: request.prefix.clone(),
        timestamp: now_nanos(),
        response: results,
    }
}

fn single_entry_tree(entry: Value) -> Value {
    let mut tree = Map::new();
    tree.insert(StateDevice::LIST.to_owned(), Value::Array(vec![entry]));
    Value::Object(tree)
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use serde_json::json;
    use statebus_api::bus::MemoryBus;
    use statebus_api::rpc::Code;
    use statebus_api::transport::LoopbackDialer;

    use super::*;
    use crate::config::CollectorConfig;
    use crate::schema::StateSchema;

    const WAIT: Duration = Duration::from_secs(2);
    const LEAF1: &str = "default/leaf1";

    struct Fixture {
        dialer: LoopbackDialer,
        server: StateServer,
    }

    fn fixture_with(config: ServerConfig) -> Fixture {
        let dialer = LoopbackDialer::new();
        let store = Arc::new(ConfigStore::new(Arc::new(StateSchema::new())));
        let registry = CollectorRegistry::new(
            CollectorConfig::default(),
            Arc::new(dialer.clone()),
            Arc::new(MemoryBus::new()),
            store,
        );
        let directory = Arc::new(TargetDirectory::new());
        let mut target = TargetConfig::new(LEAF1, "leaf1:57400");
        target.retry_timer = Duration::from_millis(20);
        directory.insert(target);
        let server = StateServer::new(config, registry, directory);
        server.mark_ready();
        Fixture { dialer, server }
    }

    fn fixture() -> Fixture {
        fixture_with(ServerConfig::default())
    }

    fn prefix() -> Option<Path> {
        Some(Path::root().with_target(LEAF1))
    }

    fn xpath(s: &str) -> Path {
        Path::from_xpath(s).unwrap()
    }

    fn replace(xpath_str: &str, value: &Value) -> SetRequest {
        SetRequest {
            prefix: prefix(),
            replace: vec![Update::new(xpath(xpath_str), TypedValue::json_ietf(value))],
            ..SetRequest::default()
        }
    }

    fn delete(xpath_str: &str) -> SetRequest {
        SetRequest {
            prefix: prefix(),
            delete: vec![xpath(xpath_str)],
            ..SetRequest::default()
        }
    }

    #[tokio::test]
    async fn get_before_ready_is_unavailable() {
        let store = Arc::new(ConfigStore::new(Arc::new(StateSchema::new())));
        let registry = CollectorRegistry::new(
            CollectorConfig::default(),
            Arc::new(LoopbackDialer::new()),
            Arc::new(MemoryBus::new()),
            store,
        );
        let server = StateServer::new(ServerConfig::default(), registry, Arc::new(TargetDirectory::new()));
        let err = server
            .get(GetRequest {
                prefix: prefix(),
                path: vec![],
            })
            .await
            .unwrap_err();
        let status = err.to_status();
        assert_eq!(status.code, Code::Unavailable);
        assert_eq!(status.message, "cache not ready");
    }

    #[tokio::test]
    async fn get_on_target_without_config_is_empty() {
        let f = fixture();
        let resp = f
            .server
            .get(GetRequest {
                prefix: prefix(),
                path: vec![xpath("/state-entry")],
            })
            .await
            .unwrap();
        assert!(resp.notification.is_empty());
    }

    #[tokio::test]
    async fn empty_set_is_invalid_argument() {
        let f = fixture();
        let err = f
            .server
            .set(SetRequest {
                prefix: prefix(),
                ..SetRequest::default()
            })
            .await
            .unwrap_err();
        let status = err.to_status();
        assert_eq!(status.code, Code::InvalidArgument);
        assert_eq!(status.message, "missing update/replace/delete path(s) in set");
    }

    #[tokio::test]
    async fn set_without_target_is_invalid_argument() {
        let f = fixture();
        let mut request = replace("/state-entry[name=a]", &json!({"path": ["/a"]}));
        request.prefix = None;
        let err = f.server.set(request).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn set_on_unknown_target_is_not_found() {
        let f = fixture();
        let mut request = replace("/state-entry[name=a]", &json!({"path": ["/a"]}));
        request.prefix = Some(Path::root().with_target("default/spine9"));
        let err = f.server.set(request).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert!(!f.server.store().has_target(&TargetId::new("default/spine9")));
    }

    #[tokio::test]
    async fn set_starts_collector_and_get_reads_back() {
        let f = fixture();
        let device = f.dialer.device("leaf1:57400");
        let resp = f
            .server
            .set(replace("/state-entry[name=ifaces]", &json!({"path": ["/interface"]})))
            .await
            .unwrap();
        assert_eq!(resp.response.len(), 1);
        assert_eq!(resp.response[0].op, UpdateOperation::Replace);
        assert!(resp.timestamp > 0);

        assert!(f.server.registry().is_active(&TargetId::new(LEAF1)));
        tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();
        assert_eq!(device.requests()[0].subscription[0].path.to_xpath(), "/interface");

        let resp = f
            .server
            .get(GetRequest {
                prefix: prefix(),
                path: vec![xpath("/state-entry[name=ifaces]/path"), xpath("/state-entry[name=nope]")],
            })
            .await
            .unwrap();
        assert_eq!(resp.notification.len(), 2);
        assert_eq!(resp.notification[0].update[0].val.to_json(), json!(["/interface"]));
        assert!(resp.notification[1].update.is_empty());

        f.server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn get_on_unknown_schema_path_is_invalid_argument() {
        let f = fixture();
        f.server
            .set(replace("/state-entry[name=a]", &json!({"path": ["/a"]})))
            .await
            .unwrap();
        let err = f
            .server
            .get(GetRequest {
                prefix: prefix(),
                path: vec![xpath("/bogus")],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        f.server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn deleting_last_entry_stops_collector() {
        let f = fixture();
        let device = f.dialer.device("leaf1:57400");
        let target = TargetId::new(LEAF1);
        f.server
            .set(replace("/state-entry[name=ifaces]", &json!({"path": ["/interface"]})))
            .await
            .unwrap();
        tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();

        f.server.set(delete("/state-entry[name=ifaces]")).await.unwrap();
        assert!(!f.server.registry().is_active(&target));
        assert!(!f.server.store().has_target(&target));
        assert_eq!(device.open_streams(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_delete_and_replace_keep_both_writes() {
        let target = TargetId::new(LEAF1);
        for _ in 0..50 {
            let f = fixture();
            f.server
                .set(replace("/state-entry[name=a]", &json!({"path": ["/a"]})))
                .await
                .unwrap();

            let deleting = tokio::spawn({
                let server = f.server.clone();
                async move { server.set(delete("/state-entry[name=a]")).await }
            });
            let replacing = tokio::spawn({
                let server = f.server.clone();
                async move {
                    server
                        .set(replace("/state-entry[name=b]", &json!({"path": ["/b"]})))
                        .await
                }
            });
            deleting.await.unwrap().unwrap();
            replacing.await.unwrap().unwrap();

            // Either serial order leaves exactly `b` with a running collector.
            let names: Vec<String> = f
                .server
                .store()
                .get(&target)
                .unwrap()
                .state_device()
                .unwrap()
                .state_entry
                .into_iter()
                .map(|e| e.name)
                .collect();
            assert_eq!(names, vec!["b".to_owned()]);
            assert!(f.server.registry().is_active(&target));
            assert_eq!(f.server.inner.writes.len(), 0);
            f.server.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn delete_on_absent_target_is_ok() {
        let f = fixture();
        let resp = f
            .server
            .set(SetRequest {
                prefix: Some(Path::root().with_target("default/ghost")),
                delete: vec![xpath("/state-entry[name=x]")],
                ..SetRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.response[0].op, UpdateOperation::Delete);
    }

    #[tokio::test]
    async fn rejected_set_keeps_running_config() {
        let f = fixture();
        f.server
            .set(replace("/state-entry[name=a]", &json!({"path": ["/a"]})))
            .await
            .unwrap();
        let entry = f.server.store().get(&TargetId::new(LEAF1)).unwrap();
        let before = entry.to_bytes().unwrap();

        let err = f
            .server
            .set(replace("/state-entry[name=b]", &json!({"path": ["/b[k=1"]})))
            .await
            .unwrap_err();
        let status = err.to_status();
        assert_eq!(status.code, Code::Internal);
        assert!(status.message.starts_with("validation failed for target default/leaf1"));
        assert_eq!(entry.to_bytes().unwrap(), before);
        f.server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn full_unary_semaphore_fails_fast() {
        let f = fixture_with(ServerConfig {
            max_unary: 0,
            ..ServerConfig::default()
        });
        let err = f
            .server
            .set(replace("/state-entry[name=a]", &json!({"path": ["/a"]})))
            .await
            .unwrap_err();
        let status = err.to_status();
        assert_eq!(status.code, Code::ResourceExhausted);
        assert_eq!(status.message, "max number of unary RPC reached");
    }

    #[tokio::test]
    async fn subscribe_streams_current_then_changes() {
        let f = fixture();
        f.server
            .set(replace("/state-entry[name=a]", &json!({"path": ["/a"]})))
            .await
            .unwrap();

        let mut stream = f
            .server
            .subscribe(&ConfigSubscribeRequest { prefix: prefix() })
            .unwrap();
        let first = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(
            first.update[0].val.to_json(),
            json!({"state-entry": [{"name": "a", "path": ["/a"]}]})
        );

        f.server
            .set(replace("/state-entry[name=b]", &json!({"path": ["/b"]})))
            .await
            .unwrap();
        let second = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(second.update[0].val.to_json()["state-entry"].as_array().unwrap().len(), 2);
        f.server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn subscription_limit_is_enforced() {
        let f = fixture_with(ServerConfig {
            max_subscriptions: 1,
            ..ServerConfig::default()
        });
        f.server
            .set(replace("/state-entry[name=a]", &json!({"path": ["/a"]})))
            .await
            .unwrap();
        let request = ConfigSubscribeRequest { prefix: prefix() };
        let held = f.server.subscribe(&request).unwrap();
        let err = f.server.subscribe(&request).err().unwrap();
        assert_eq!(err.code(), Code::ResourceExhausted);
        drop(held);
        assert!(f.server.subscribe(&request).is_ok());
        f.server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn observe_compares_desired_entry() {
        let f = fixture();
        let target = TargetId::new(LEAF1);
        let desired = StateEntry::new("ifaces").with_path("/interface");
        assert_eq!(
            f.server.observe(&target, &desired),
            Observation {
                exists: false,
                up_to_date: false
            }
        );

        f.server
            .seed_target(f.server.directory().get(&target).unwrap(), std::slice::from_ref(&desired))
            .await
            .unwrap();
        assert_eq!(
            f.server.observe(&target, &desired),
            Observation {
                exists: true,
                up_to_date: true
            }
        );

        let changed = desired.clone().with_path("/system");
        assert_eq!(
            f.server.observe(&target, &changed),
            Observation {
                exists: true,
                up_to_date: false
            }
        );
        assert!(!f.server.observe(&target, &StateEntry::new("other")).exists);
        f.server.shutdown().await.unwrap();
    }
}

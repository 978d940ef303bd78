#![allow(clippy::unwrap_used)]

// End-to-end: RPC client → WebSocket server → store → collector → bus.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use statebus_api::bus::{BusConnector, FileBus, MemoryBus, StreamConfig};
use statebus_api::rpc::{Code, ConfigSubscribeRequest, GetRequest, RpcClient, SetRequest};
use statebus_api::transport::{LoopbackDialer, TargetConfig};
use statebus_api::{Error, Notification, Path, TypedValue, Update};
use statebus_core::{
    CollectorConfig, CollectorRegistry, ConfigStore, ProducerMode, ServerConfig, StateEntry,
    StateSchema, StateServer, TargetDirectory, TargetId,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    dialer: LoopbackDialer,
    server: StateServer,
    url: Url,
    cancel: CancellationToken,
}

async fn harness(connector: Arc<dyn BusConnector>, mode: ProducerMode) -> Harness {
    let dialer = LoopbackDialer::new();
    let store = Arc::new(ConfigStore::new(Arc::new(StateSchema::new())));
    let collector = CollectorConfig {
        producer_mode: mode,
        bus_reconnect_delay: Duration::from_millis(10),
        ..CollectorConfig::default()
    };
    let registry = CollectorRegistry::new(collector, Arc::new(dialer.clone()), connector, store);
    let server = StateServer::new(
        ServerConfig::default(),
        registry,
        Arc::new(TargetDirectory::new()),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn({
        let server = server.clone();
        let cancel = cancel.clone();
        async move { server.serve(listener, cancel).await }
    });

    Harness {
        dialer,
        server,
        url,
        cancel,
    }
}

fn leaf(name: &str) -> TargetConfig {
    let mut config = TargetConfig::new(format!("default/{name}"), format!("{name}:57400"));
    config.retry_timer = Duration::from_millis(20);
    config
}

fn prefix(target: &str) -> Option<Path> {
    Some(Path::root().with_target(target))
}

fn oper_state(name: &str, value: &str) -> Notification {
    Notification {
        timestamp: 1_700_000_000_000,
        prefix: Some(Path::from_xpath(&format!("/interface[name={name}]")).unwrap()),
        update: vec![Update::new(
            Path::from_xpath("/oper-state").unwrap(),
            TypedValue::String(value.into()),
        )],
        delete: vec![],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seeded_target_streams_to_bus() {
    let bus = MemoryBus::new();
    let h = harness(Arc::new(bus.clone()), ProducerMode::PerSession).await;
    let device = h.dialer.device("leaf1:57400");

    h.server
        .seed_target(
            leaf("leaf1"),
            &[StateEntry::new("ifaces").with_path("/interface[name=ethernet-1/1]")],
        )
        .await
        .unwrap();
    h.server.mark_ready();
    assert!(h.server.registry().is_active(&TargetId::new("default/leaf1")));

    tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();
    device.sync();
    device.notify(oper_state("ethernet-1/1", "up"));
    device.notify(Notification {
        timestamp: 1_700_000_000_001,
        delete: vec![Path::from_xpath("/interface[name=ethernet-1/1]/description").unwrap()],
        ..Notification::default()
    });
    tokio::time::timeout(WAIT, bus.wait_for_published(2)).await.unwrap();

    let stored = bus.messages("nddpstate");
    assert_eq!(
        stored[0].subject,
        "nddpstate.default/leaf1.interface.{name=ethernet-1/1}.oper-state"
    );
    let body: Value = serde_json::from_slice(&stored[0].payload).unwrap();
    assert_eq!(
        body,
        json!({
            "timestamp": 1_700_000_000_000_i64,
            "operation": "update",
            "data": "up",
            "tags": {"target": "default/leaf1"}
        })
    );
    let body: Value = serde_json::from_slice(&stored[1].payload).unwrap();
    assert_eq!(body["operation"], "delete");
    assert!(body.get("data").is_none());

    h.server.shutdown().await.unwrap();
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rpc_set_get_and_delete() {
    let bus = MemoryBus::new();
    let h = harness(Arc::new(bus.clone()), ProducerMode::PerSession).await;
    h.server.seed_target(leaf("leaf1"), &[]).await.unwrap();
    h.server.mark_ready();
    let device = h.dialer.device("leaf1:57400");
    let target = TargetId::new("default/leaf1");

    let mut client = RpcClient::connect(&h.url).await.unwrap();
    let resp = client
        .set(SetRequest {
            prefix: prefix("default/leaf1"),
            replace: vec![Update::new(
                Path::from_xpath("/state-entry[name=sys]").unwrap(),
                TypedValue::json_ietf(&json!({"prefix": "/system", "path": ["/name"]})),
            )],
            ..SetRequest::default()
        })
        .await
        .unwrap();
    assert!(resp.timestamp > 0);
    assert!(h.server.registry().is_active(&target));
    tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();
    assert_eq!(
        device.requests()[0].subscription[0].path.to_xpath(),
        "/system/name"
    );

    let resp = client
        .get(GetRequest {
            prefix: prefix("default/leaf1"),
            path: vec![Path::from_xpath("/state-entry[name=sys]/prefix").unwrap()],
        })
        .await
        .unwrap();
    assert_eq!(resp.notification[0].update[0].val.to_json(), json!("/system"));

    client
        .set(SetRequest {
            prefix: prefix("default/leaf1"),
            delete: vec![Path::from_xpath("/state-entry[name=sys]").unwrap()],
            ..SetRequest::default()
        })
        .await
        .unwrap();
    assert!(!h.server.registry().is_active(&target));
    assert_eq!(device.open_streams(), 0);

    let err = client
        .set(SetRequest {
            prefix: prefix("default/leaf1"),
            ..SetRequest::default()
        })
        .await
        .unwrap_err();
    match err {
        Error::Rpc { code, message } => {
            assert_eq!(code, Code::InvalidArgument);
            assert_eq!(message, "missing update/replace/delete path(s) in set");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }

    client.close().await.unwrap();
    h.server.shutdown().await.unwrap();
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rpc_subscribe_streams_running_config() {
    let h = harness(Arc::new(MemoryBus::new()), ProducerMode::Shared).await;
    h.server
        .seed_target(leaf("leaf1"), &[StateEntry::new("a").with_path("/a")])
        .await
        .unwrap();
    h.server.mark_ready();

    let subscriber = RpcClient::connect(&h.url).await.unwrap();
    let mut stream = Box::pin(
        subscriber
            .subscribe(ConfigSubscribeRequest {
                prefix: prefix("default/leaf1"),
            })
            .await
            .unwrap(),
    );
    let first = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(
        first.update[0].val.to_json(),
        json!({"state-entry": [{"name": "a", "path": ["/a"]}]})
    );

    let mut client = RpcClient::connect(&h.url).await.unwrap();
    client
        .set(SetRequest {
            prefix: prefix("default/leaf1"),
            update: vec![Update::new(
                Path::from_xpath("/state-entry[name=a]/prefix").unwrap(),
                TypedValue::String("/system".into()),
            )],
            ..SetRequest::default()
        })
        .await
        .unwrap();

    let second = tokio::time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(second.update[0].val.to_json()["state-entry"][0]["prefix"], "/system");

    h.server.shutdown().await.unwrap();
    h.cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_bus_receives_messages() {
    let dir = tempfile::tempdir().unwrap();
    let bus = FileBus::new(dir.path());
    let h = harness(Arc::new(bus.clone()), ProducerMode::Shared).await;
    let device = h.dialer.device("leaf1:57400");
    h.server
        .seed_target(leaf("leaf1"), &[StateEntry::new("ifaces").with_path("/interface")])
        .await
        .unwrap();

    tokio::time::timeout(WAIT, device.wait_for_subscriptions(1)).await.unwrap();
    device.notify(oper_state("ethernet-1/2", "down"));

    let stream = StreamConfig::new("nddpstate");
    tokio::time::timeout(WAIT, async {
        loop {
            // A fresh connection re-reads the stream log.
            let mut conn = bus.connect().await.unwrap();
            let info = conn.stream_info(&stream.name).await.unwrap();
            if info.is_some_and(|info| info.messages >= 1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    h.server.shutdown().await.unwrap();
    h.cancel.cancel();
}

// ── Loopback transport ──
//
// In-process devices. A `LoopbackDevice` handle pushes notifications to
// whichever session is currently subscribed to it, and records every
// subscription request it received.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::{NotificationStream, TargetClient, TargetConfig, TargetDialer};
use crate::error::Error;
use crate::notification::{Notification, SubscribeRequest, SubscribeResponse};

type ResponseSender = mpsc::UnboundedSender<Result<SubscribeResponse, Error>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── LoopbackDialer ───────────────────────────────────────────────────

/// Dialer resolving target addresses to in-process devices.
///
/// Devices are created on first use, either by [`device`](Self::device)
/// or by a dial to an unknown address.
#[derive(Clone, Default)]
pub struct LoopbackDialer {
    devices: Arc<Mutex<HashMap<String, LoopbackDevice>>>,
}

impl LoopbackDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the device listening on `address`.
    pub fn device(&self, address: &str) -> LoopbackDevice {
        lock(&self.devices)
            .entry(address.to_owned())
            .or_insert_with(LoopbackDevice::new)
            .clone()
    }
}

#[async_trait]
impl TargetDialer for LoopbackDialer {
    async fn dial(&self, config: &TargetConfig) -> Result<Box<dyn TargetClient>, Error> {
        let device = self.device(&config.address);
        if device.inner.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Dial {
                address: config.address.clone(),
                reason: "connection refused".into(),
            });
        }
        device.inner.dials.send_modify(|n| *n += 1);
        Ok(Box::new(LoopbackClient { device }))
    }
}

// ── LoopbackDevice ───────────────────────────────────────────────────

/// Handle to one in-process device.
#[derive(Clone)]
pub struct LoopbackDevice {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    streams: Mutex<Vec<ResponseSender>>,
    requests: Mutex<Vec<SubscribeRequest>>,
    subscriptions: watch::Sender<usize>,
    dials: watch::Sender<usize>,
    unreachable: AtomicBool,
}

impl LoopbackDevice {
    fn new() -> Self {
        let (subscriptions, _) = watch::channel(0);
        let (dials, _) = watch::channel(0);
        Self {
            inner: Arc::new(DeviceInner {
                streams: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                subscriptions,
                dials,
                unreachable: AtomicBool::new(false),
            }),
        }
    }

    /// Refuse (or accept again) new dials and subscriptions.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Deliver a notification to every open stream. Returns how many received it.
    pub fn notify(&self, notification: Notification) -> usize {
        self.send(&SubscribeResponse::Update(notification))
    }

    /// Signal the end of the initial state dump.
    pub fn sync(&self) -> usize {
        self.send(&SubscribeResponse::SyncResponse)
    }

    /// Fail every open stream, as a dropped connection would.
    pub fn drop_streams(&self) {
        let mut streams = lock(&self.inner.streams);
        for tx in streams.drain(..) {
            let _ = tx.send(Err(Error::StreamClosed));
        }
    }

    /// Streams whose receiving session is still alive.
    pub fn open_streams(&self) -> usize {
        let mut streams = lock(&self.inner.streams);
        streams.retain(|tx| !tx.is_closed());
        streams.len()
    }

    /// Every subscription request received so far, oldest first.
    pub fn requests(&self) -> Vec<SubscribeRequest> {
        lock(&self.inner.requests).clone()
    }

    /// Total number of subscriptions opened.
    pub fn subscription_count(&self) -> usize {
        *self.inner.subscriptions.borrow()
    }

    /// Total number of successful dials.
    pub fn dial_count(&self) -> usize {
        *self.inner.dials.borrow()
    }

    /// Wait until at least `count` subscriptions have been opened.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        let mut rx = self.inner.subscriptions.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    fn send(&self, response: &SubscribeResponse) -> usize {
        let mut streams = lock(&self.inner.streams);
        streams.retain(|tx| !tx.is_closed());
        streams
            .iter()
            .filter(|tx| tx.send(Ok(response.clone())).is_ok())
            .count()
    }

    fn open(&self, request: SubscribeRequest) -> Result<NotificationStream, Error> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Subscribe {
                reason: "target unreachable".into(),
            });
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        lock(&self.inner.streams).push(tx);
        lock(&self.inner.requests).push(request);
        self.inner.subscriptions.send_modify(|n| *n += 1);

        Ok(Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        }))
    }
}

struct LoopbackClient {
    device: LoopbackDevice,
}

#[async_trait]
impl TargetClient for LoopbackClient {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<NotificationStream, Error> {
        self.device.open(request)
    }
}

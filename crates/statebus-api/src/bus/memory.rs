// ── In-process bus ──
//
// Streams live in a shared map; every connection sees the same data.
// Fault knobs let callers refuse connects or fail publishes to drive
// reconnect paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::{BusConnection, BusConnector, PublishAck, StreamConfig, StreamInfo};
use crate::error::Error;
use crate::subject::subject_matches;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A message stored on a memory stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sequence: u64,
    pub subject: String,
    pub payload: Bytes,
}

struct MemoryStream {
    config: StreamConfig,
    created: DateTime<Utc>,
    messages: Vec<StoredMessage>,
}

impl MemoryStream {
    fn info(&self) -> StreamInfo {
        StreamInfo {
            config: self.config.clone(),
            created: self.created,
            messages: self.messages.len() as u64,
        }
    }
}

#[derive(Default)]
struct Faults {
    refuse_connects: u32,
    fail_publishes: u32,
}

struct MemoryBusInner {
    streams: Mutex<BTreeMap<String, MemoryStream>>,
    faults: Mutex<Faults>,
    connects: watch::Sender<u64>,
    published: watch::Sender<u64>,
}

// ── MemoryBus ────────────────────────────────────────────────────────

/// Cheaply cloneable handle to an in-process bus.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<MemoryBusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (connects, _) = watch::channel(0);
        let (published, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryBusInner {
                streams: Mutex::new(BTreeMap::new()),
                faults: Mutex::new(Faults::default()),
                connects,
                published,
            }),
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next_connects(&self, n: u32) {
        lock(&self.inner.faults).refuse_connects = n;
    }

    /// Fail the next `n` publishes (and drop the connection that attempted them).
    pub fn fail_next_publishes(&self, n: u32) {
        lock(&self.inner.faults).fail_publishes = n;
    }

    pub fn stream_names(&self) -> Vec<String> {
        lock(&self.inner.streams).keys().cloned().collect()
    }

    /// Messages stored on `stream`, oldest first.
    pub fn messages(&self, stream: &str) -> Vec<StoredMessage> {
        lock(&self.inner.streams)
            .get(stream)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// Successful connections so far.
    pub fn connect_count(&self) -> u64 {
        *self.inner.connects.borrow()
    }

    /// Wait until at least `count` messages were published in total.
    pub async fn wait_for_published(&self, count: u64) {
        let mut rx = self.inner.published.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    /// Wait until at least `count` connections were opened.
    pub async fn wait_for_connects(&self, count: u64) {
        let mut rx = self.inner.connects.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

#[async_trait]
impl BusConnector for MemoryBus {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, Error> {
        {
            let mut faults = lock(&self.inner.faults);
            if faults.refuse_connects > 0 {
                faults.refuse_connects -= 1;
                return Err(Error::BusConnect {
                    reason: "connection refused".into(),
                });
            }
        }
        self.inner.connects.send_modify(|n| *n += 1);
        Ok(Box::new(MemoryConnection {
            bus: self.clone(),
            closed: false,
        }))
    }
}

// ── MemoryConnection ─────────────────────────────────────────────────

struct MemoryConnection {
    bus: MemoryBus,
    closed: bool,
}

impl MemoryConnection {
    fn check_open(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::BusClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BusConnection for MemoryConnection {
    async fn stream_info(&mut self, name: &str) -> Result<Option<StreamInfo>, Error> {
        self.check_open()?;
        Ok(lock(&self.bus.inner.streams).get(name).map(MemoryStream::info))
    }

    async fn add_stream(&mut self, config: &StreamConfig) -> Result<StreamInfo, Error> {
        self.check_open()?;
        let mut streams = lock(&self.bus.inner.streams);
        if let Some(existing) = streams.get(&config.name) {
            if existing.config == *config {
                return Ok(existing.info());
            }
            return Err(Error::StreamCreate {
                name: config.name.clone(),
                reason: "stream name already in use with a different configuration".into(),
            });
        }
        let stream = MemoryStream {
            config: config.clone(),
            created: Utc::now(),
            messages: Vec::new(),
        };
        let info = stream.info();
        streams.insert(config.name.clone(), stream);
        Ok(info)
    }

    async fn publish(&mut self, subject: &str, payload: Bytes) -> Result<PublishAck, Error> {
        self.check_open()?;
        {
            let mut faults = lock(&self.bus.inner.faults);
            if faults.fail_publishes > 0 {
                faults.fail_publishes -= 1;
                self.closed = true;
                return Err(Error::Publish {
                    subject: subject.to_owned(),
                    reason: "connection reset".into(),
                });
            }
        }

        let ack = {
            let mut streams = lock(&self.bus.inner.streams);
            let stream = streams
                .values_mut()
                .find(|s| s.config.subjects.iter().any(|f| subject_matches(f, subject)))
                .ok_or_else(|| Error::NoStreamForSubject {
                    subject: subject.to_owned(),
                })?;
            let sequence = stream.messages.len() as u64 + 1;
            stream.messages.push(StoredMessage {
                sequence,
                subject: subject.to_owned(),
                payload,
            });
            PublishAck {
                stream: stream.config.name.clone(),
                sequence,
            }
        };
        self.bus.inner.published.send_modify(|n| *n += 1);
        Ok(ack)
    }
}

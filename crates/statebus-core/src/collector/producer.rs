// ── Bus producer worker ──
//
// Owns the bus connection, makes sure the state stream exists, then
// publishes queued messages in order. Connection failures are retried
// forever with a fixed delay. A failed publish drops the connection and
// the message with it: delivery across a reconnect is at most once.

use std::sync::Arc;
use std::time::Duration;

use statebus_api::bus::{BusConnection, BusConnector, StreamConfig, ensure_stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::model::BusMessage;

/// Publishes [`BusMessage`]s received on a channel.
#[derive(Clone)]
pub struct BusProducer {
    connector: Arc<dyn BusConnector>,
    stream: StreamConfig,
    reconnect_delay: Duration,
}

impl BusProducer {
    pub fn new(connector: Arc<dyn BusConnector>, stream: StreamConfig, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            stream,
            reconnect_delay,
        }
    }

    /// Spawn the worker with a queue of `capacity` messages.
    pub fn spawn(
        self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (mpsc::Sender<BusMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run(rx, cancel));
        (tx, handle)
    }

    /// Publish until cancelled or every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<BusMessage>, cancel: CancellationToken) {
        'connect: loop {
            let Some(mut conn) = self.connect(&cancel).await else {
                return;
            };

            loop {
                let msg = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    msg = rx.recv() => match msg {
                        Some(msg) => msg,
                        None => {
                            tracing::debug!(stream = %self.stream.name, "producer queue closed");
                            return;
                        }
                    },
                };

                let payload = match msg.to_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(subject = %msg.subject, error = %e, "cannot encode message");
                        continue;
                    }
                };
                match conn.publish(&msg.subject, payload).await {
                    Ok(ack) => {
                        tracing::trace!(subject = %msg.subject, sequence = ack.sequence, "published");
                    }
                    Err(e) => {
                        tracing::warn!(subject = %msg.subject, error = %e, "publish failed, reconnecting");
                        continue 'connect;
                    }
                }
            }
        }
    }

    /// Connect and ensure the stream, retrying until it works or `cancel`
    /// fires.
    async fn connect(&self, cancel: &CancellationToken) -> Option<Box<dyn BusConnection>> {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.try_connect().await {
                Ok(conn) => {
                    tracing::info!(stream = %self.stream.name, attempt, "connected to message bus");
                    return Some(conn);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "message bus unavailable, retrying");
                }
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn try_connect(&self) -> Result<Box<dyn BusConnection>, CoreError> {
        let mut conn = self.connector.connect().await?;
        ensure_stream(conn.as_mut(), &self.stream).await?;
        Ok(conn)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use statebus_api::bus::MemoryBus;

    use super::*;

    fn producer(bus: &MemoryBus) -> BusProducer {
        BusProducer::new(
            Arc::new(bus.clone()),
            StreamConfig::new("nddpstate"),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn publishes_in_order() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let (tx, handle) = producer(&bus).spawn(16, cancel.clone());

        for i in 0..5 {
            tx.send(BusMessage::update(format!("nddpstate.t.leaf{i}"), i, "v"))
                .await
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(2), bus.wait_for_published(5))
            .await
            .unwrap();

        let subjects: Vec<String> = bus
            .messages("nddpstate")
            .into_iter()
            .map(|m| m.subject)
            .collect();
        assert_eq!(
            subjects,
            (0..5).map(|i| format!("nddpstate.t.leaf{i}")).collect::<Vec<_>>()
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retries_until_bus_accepts() {
        let bus = MemoryBus::new();
        bus.refuse_next_connects(3);
        let cancel = CancellationToken::new();
        let (tx, _handle) = producer(&bus).spawn(16, cancel.clone());

        tx.send(BusMessage::update("nddpstate.t.a", 1, "v")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), bus.wait_for_published(1))
            .await
            .unwrap();
        assert_eq!(bus.connect_count(), 1);
        assert_eq!(bus.stream_names(), vec!["nddpstate".to_owned()]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn failed_publish_reconnects_and_drops_message() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let (tx, _handle) = producer(&bus).spawn(16, cancel.clone());
        tokio::time::timeout(Duration::from_secs(2), bus.wait_for_connects(1))
            .await
            .unwrap();

        bus.fail_next_publishes(1);
        tx.send(BusMessage::update("nddpstate.t.lost", 1, "v")).await.unwrap();
        tx.send(BusMessage::update("nddpstate.t.kept", 2, "v")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), bus.wait_for_published(1))
            .await
            .unwrap();

        let messages = bus.messages("nddpstate");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "nddpstate.t.kept");
        assert_eq!(bus.connect_count(), 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn payload_is_json_body() {
        let bus = MemoryBus::new();
        let cancel = CancellationToken::new();
        let (tx, _handle) = producer(&bus).spawn(4, cancel.clone());
        tx.send(BusMessage::delete("nddpstate.t.a", 9)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), bus.wait_for_published(1))
            .await
            .unwrap();

        let body: serde_json::Value =
            serde_json::from_slice(&bus.messages("nddpstate")[0].payload).unwrap();
        assert_eq!(body, serde_json::json!({"timestamp": 9, "operation": "delete"}));
        cancel.cancel();
    }
}

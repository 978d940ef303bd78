// ── Target session ──
//
// One subscription on one device. The session dials once; a dial failure
// is returned to the caller. After that the run loop owns the client:
// every stream failure is logged and the subscription reopened after the
// retry delay, until the session is cancelled.

use std::time::Duration;

use futures_util::StreamExt;
use statebus_api::SubscribeResponse;
use statebus_api::notification::SubscribeRequest;
use statebus_api::transport::{TargetClient, TargetConfig, TargetDialer};
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handler::notification_to_messages;
use super::producer::BusProducer;
use super::subscription::Subscription;
use crate::error::CoreError;
use crate::model::{BusMessage, TargetId};

/// Lifecycle of a [`TargetSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SessionState {
    /// Client dialed, no subscription sent yet.
    Created,
    Subscribing,
    Streaming,
    Stopping,
    /// Terminal.
    Stopped,
}

/// Per-session knobs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bus stream name, first token of every subject.
    pub stream: String,
    /// Pause between a failed run and the next subscribe.
    pub retry_delay: Duration,
}

impl SessionSettings {
    pub fn new(stream: impl Into<String>, target: &TargetConfig) -> Self {
        Self {
            stream: stream.into(),
            retry_delay: target.retry_timer,
        }
    }
}

/// Where a session's bus messages go.
pub enum Publisher {
    /// Spawn a producer owned by the session, with a queue of the target's
    /// buffer size.
    Dedicated(BusProducer),
    /// Feed a producer shared with other sessions.
    Shared(mpsc::Sender<BusMessage>),
}

/// A running collector for one target.
pub struct TargetSession {
    target: TargetId,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for TargetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetSession")
            .field("target", &self.target)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl TargetSession {
    /// Dial the target and spawn the run loop.
    ///
    /// Returns once the client is connected; the subscription itself is
    /// opened in the background. `parent` cancels the session from above.
    pub async fn start(
        config: &TargetConfig,
        subscription: &Subscription,
        dialer: &dyn TargetDialer,
        publisher: Publisher,
        settings: SessionSettings,
        parent: &CancellationToken,
    ) -> Result<Self, CoreError> {
        let target = TargetId::new(config.name.clone());
        let wrap = |source: CoreError| CoreError::Start {
            target: target.to_string(),
            source: Box::new(source),
        };

        let client = match tokio::time::timeout(config.timeout, dialer.dial(config)).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(wrap(e.into())),
            Err(_) => {
                return Err(wrap(CoreError::Timeout {
                    timeout_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
                }));
            }
        };

        let cancel = parent.child_token();
        let (state, _) = watch::channel(SessionState::Created);
        let mut tasks = Vec::with_capacity(2);

        let tx = match publisher {
            Publisher::Dedicated(producer) => {
                let (tx, handle) = producer.spawn(config.buffer_size, cancel.child_token());
                tasks.push(handle);
                tx
            }
            Publisher::Shared(tx) => tx,
        };

        let run = RunLoop {
            target: target.clone(),
            client,
            request: subscription.request(),
            tx,
            state: state.clone(),
            cancel: cancel.clone(),
            settings,
        };
        tasks.push(tokio::spawn(run.run()));

        tracing::info!(%target, paths = subscription.paths().len(), "collector started");
        Ok(Self {
            target,
            state,
            cancel,
            tasks,
        })
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Cancel the subscription and wait for the run loop and producer to
    /// finish. A second call does nothing.
    pub async fn stop(&mut self) {
        if self.state() == SessionState::Stopped {
            return;
        }
        self.state.send_replace(SessionState::Stopping);
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(target = %self.target, error = %e, "collector task failed");
            }
        }
        self.state.send_replace(SessionState::Stopped);
        tracing::info!(target = %self.target, "collector stopped");
    }
}

impl Drop for TargetSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Run loop ─────────────────────────────────────────────────────────

struct RunLoop {
    target: TargetId,
    client: Box<dyn TargetClient>,
    request: SubscribeRequest,
    tx: mpsc::Sender<BusMessage>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    settings: SessionSettings,
}

impl RunLoop {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.receive() => result,
            };
            match result {
                Ok(()) => break,
                Err(CoreError::Bus { reason }) => {
                    // Producer gone: nothing left to publish to.
                    tracing::warn!(target = %self.target, %reason, "producer stopped, ending collector");
                    self.cancel.cancel();
                    break;
                }
                Err(e) => {
                    tracing::warn!(target = %self.target, error = %e, attempt, "subscription failed, retrying");
                }
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.retry_delay) => {}
            }
        }
        self.client.close().await;
    }

    /// Subscribe and forward until the stream fails. `Ok` only when the
    /// session was cancelled mid-send.
    async fn receive(&self) -> Result<(), CoreError> {
        self.state.send_replace(SessionState::Subscribing);
        let mut stream = self.client.subscribe(self.request.clone()).await?;
        self.state.send_replace(SessionState::Streaming);
        tracing::debug!(target = %self.target, "subscription open");

        while let Some(item) = stream.next().await {
            match item? {
                SubscribeResponse::Update(notification) => {
                    let messages =
                        notification_to_messages(&self.settings.stream, &self.target, &notification);
                    for msg in messages {
                        tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => return Ok(()),
                            sent = self.tx.send(msg) => {
                                if sent.is_err() {
                                    return Err(CoreError::Bus {
                                        reason: "producer queue closed".into(),
                                    });
                                }
                            }
                        }
                    }
                }
                SubscribeResponse::SyncResponse => {
                    tracing::debug!(target = %self.target, "initial sync complete");
                }
            }
        }
        Err(CoreError::StreamClosed)
    }
}

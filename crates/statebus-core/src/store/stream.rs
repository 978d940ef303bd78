// ── Running config streams ──

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A subscription to one target's running config.
///
/// Provides point-in-time access and change notification via
/// [`changed`](Self::changed), or a `Stream` through
/// [`into_stream`](Self::into_stream).
pub struct ConfigStream {
    current: Arc<Value>,
    receiver: watch::Receiver<Arc<Value>>,
}

impl ConfigStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<Value>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The tree captured at creation time (or at the last `changed()`).
    pub fn current(&self) -> &Arc<Value> {
        &self.current
    }

    /// Wait for the next commit. `None` once the entry is gone.
    pub async fn changed(&mut self) -> Option<Arc<Value>> {
        self.receiver.changed().await.ok()?;
        let tree = self.receiver.borrow_and_update().clone();
        self.current = tree.clone();
        Some(tree)
    }

    /// Yields the current tree first, then every committed tree.
    pub fn into_stream(self) -> ConfigWatchStream {
        ConfigWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct ConfigWatchStream {
    inner: WatchStream<Arc<Value>>,
}

impl Stream for ConfigWatchStream {
    type Item = Arc<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

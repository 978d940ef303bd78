// ── WebSocket listener ──
//
// One task per connection. Requests are handled on their own tasks so a
// long Set never blocks a Get on the same socket; all responses funnel
// through a single writer task. Subscriptions run until the client goes
// away or the listener is cancelled.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use statebus_api::rpc::{
    ConfigSubscribeRequest, RequestFrame, ResponseBody, ResponseFrame, RpcRequest, RpcResponse,
    RpcStatus,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::StateServer;
use crate::error::CoreError;

const OUTBOUND_CHANNEL_SIZE: usize = 64;

impl StateServer {
    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, CoreError> {
        let address = self.inner.config.listen;
        TcpListener::bind(address).await.map_err(|e| CoreError::Bind {
            address: address.to_string(),
            reason: e.to_string(),
        })
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<(), CoreError> {
        if let Ok(address) = listener.local_addr() {
            tracing::info!(%address, "state server listening");
        }
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            let server = self.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move { server.handle_connection(stream, peer, cancel).await });
        }
        tracing::info!("state server stopped");
        Ok(())
    }

    async fn handle_connection(self, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let conn = Uuid::new_v4();
        let socket = match tokio_tungstenite::accept_async(stream).await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "websocket handshake failed");
                return;
            }
        };
        tracing::debug!(%conn, %peer, "client connected");

        let (mut sink, mut source) = socket.split();
        let (tx, mut rx) = mpsc::channel::<ResponseFrame>(OUTBOUND_CHANNEL_SIZE);

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(%conn, error = %e, "cannot encode response");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    tracing::debug!(%conn, error = %e, "write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = source.next() => message,
            };
            match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<RequestFrame>(text.as_str()) {
                        Ok(frame) => {
                            let server = self.clone();
                            let tx = tx.clone();
                            let cancel = cancel.clone();
                            tokio::spawn(async move { server.dispatch(frame, tx, cancel).await });
                        }
                        Err(e) => {
                            tracing::debug!(%conn, error = %e, "malformed request");
                            let frame = ResponseFrame {
                                id: 0,
                                body: ResponseBody::Error(RpcStatus::invalid_argument(format!(
                                    "malformed request: {e}"
                                ))),
                            };
                            if tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%conn, error = %e, "read failed");
                    break;
                }
            }
        }

        // Ends this connection's subscriptions.
        cancel.cancel();
        drop(tx);
        let _ = writer.await;
        tracing::debug!(%conn, %peer, "client disconnected");
    }

    async fn dispatch(self, frame: RequestFrame, tx: mpsc::Sender<ResponseFrame>, cancel: CancellationToken) {
        let id = frame.id;
        let body = match frame.request {
            RpcRequest::Get(request) => self.get(request).await.map(RpcResponse::Get),
            RpcRequest::Set(request) => self.set(request).await.map(RpcResponse::Set),
            RpcRequest::Subscribe(request) => {
                self.forward_subscription(id, &request, &tx, &cancel).await;
                return;
            }
        };
        let body = match body {
            Ok(response) => ResponseBody::Result(response),
            Err(e) => {
                tracing::debug!(id, error = %e.chain(), "request failed");
                ResponseBody::Error(e.to_status())
            }
        };
        let _ = tx.send(ResponseFrame { id, body }).await;
    }

    async fn forward_subscription(
        &self,
        id: u64,
        request: &ConfigSubscribeRequest,
        tx: &mpsc::Sender<ResponseFrame>,
        cancel: &CancellationToken,
    ) {
        let mut subscription = match self.subscribe(request) {
            Ok(subscription) => subscription,
            Err(e) => {
                let body = ResponseBody::Error(e.to_status());
                let _ = tx.send(ResponseFrame { id, body }).await;
                return;
            }
        };
        loop {
            let notification = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = subscription.next() => match next {
                    Some(notification) => notification,
                    None => break,
                },
            };
            let frame = ResponseFrame {
                id,
                body: ResponseBody::Notification(notification),
            };
            if tx.send(frame).await.is_err() {
                break;
            }
        }
        tracing::debug!(id, "config subscription closed");
    }
}

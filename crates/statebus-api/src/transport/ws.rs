// ── WebSocket transport ──
//
// Targets expose `ws://<address>/subscribe`. The client sends one
// `SubscribeRequest` as a JSON text frame and reads `SubscribeResponse`
// JSON frames until the socket closes.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{NotificationStream, TargetClient, TargetConfig, TargetDialer};
use crate::error::Error;
use crate::notification::{SubscribeRequest, SubscribeResponse};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SUBSCRIBE_PATH: &str = "/subscribe";

// ── WsDialer ─────────────────────────────────────────────────────────

/// Dials targets over WebSocket.
#[derive(Debug, Default, Clone)]
pub struct WsDialer;

impl WsDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TargetDialer for WsDialer {
    async fn dial(&self, config: &TargetConfig) -> Result<Box<dyn TargetClient>, Error> {
        let url = subscribe_url(&config.address)?;
        let socket = open_socket(&url, config).await?;
        Ok(Box::new(WsClient {
            url,
            config: config.clone(),
            socket: Mutex::new(Some(socket)),
        }))
    }
}

/// Build the subscribe endpoint from a bare `host:port` or a full URL.
fn subscribe_url(address: &str) -> Result<Url, Error> {
    let mut url = if address.starts_with("ws://") || address.starts_with("wss://") {
        Url::parse(address)?
    } else {
        Url::parse(&format!("ws://{address}"))?
    };
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(SUBSCRIBE_PATH);
    }
    Ok(url)
}

async fn open_socket(url: &Url, config: &TargetConfig) -> Result<WsStream, Error> {
    tracing::debug!(target_name = %config.name, url = %url, "dialing target");

    let uri: tungstenite::http::Uri = url.as_str().parse().map_err(
        |e: tungstenite::http::uri::InvalidUri| Error::Dial {
            address: config.address.clone(),
            reason: e.to_string(),
        },
    )?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(username) = &config.username {
        request = request.with_header("x-statebus-username", username.clone());
    }
    if let Some(password) = &config.password {
        request = request.with_header("x-statebus-password", password.expose_secret().to_owned());
    }

    let connect = tokio_tungstenite::connect_async(request);
    let (socket, _response) = tokio::time::timeout(config.timeout, connect)
        .await
        .map_err(|_| Error::DialTimeout {
            address: config.address.clone(),
            timeout_ms: duration_ms(config.timeout),
        })?
        .map_err(|e| Error::Dial {
            address: config.address.clone(),
            reason: e.to_string(),
        })?;

    Ok(socket)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── WsClient ─────────────────────────────────────────────────────────

struct WsClient {
    url: Url,
    config: TargetConfig,
    /// Socket opened by `dial`, consumed by the first subscribe.
    socket: Mutex<Option<WsStream>>,
}

#[async_trait]
impl TargetClient for WsClient {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<NotificationStream, Error> {
        let socket = self.socket.lock().await.take();
        let mut socket = match socket {
            Some(socket) => socket,
            None => open_socket(&self.url, &self.config).await?,
        };

        let body = serde_json::to_string(&request)?;
        socket
            .send(tungstenite::Message::text(body))
            .await
            .map_err(|e| Error::Subscribe {
                reason: e.to_string(),
            })?;

        Ok(Box::pin(read_responses(socket)))
    }

    async fn close(&self) {
        if let Some(mut socket) = self.socket.lock().await.take() {
            let _ = socket.close(None).await;
        }
    }
}

/// Turn the socket into a stream of responses. Ends with an error item
/// when the socket closes, since a subscription never ends on its own.
fn read_responses(
    mut socket: WsStream,
) -> impl futures_core::Stream<Item = Result<SubscribeResponse, Error>> + Send {
    async_stream::stream! {
        loop {
            match socket.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if let Some(response) = parse_response(text.as_str()) {
                        yield Ok(response);
                    }
                }
                Some(Ok(tungstenite::Message::Ping(_))) => {
                    // tungstenite answers pings itself
                    tracing::trace!("WebSocket ping");
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        tracing::debug!(code = %cf.code, reason = %cf.reason, "target closed subscription");
                    }
                    yield Err(Error::StreamClosed);
                    break;
                }
                Some(Err(e)) => {
                    yield Err(Error::WebSocket(e.to_string()));
                    break;
                }
                None => {
                    yield Err(Error::StreamClosed);
                    break;
                }
                Some(Ok(_)) => {
                    // Binary, Pong, Frame
                }
            }
        }
    }
}

/// Parse one text frame. Malformed frames are logged and skipped.
fn parse_response(text: &str) -> Option<SubscribeResponse> {
    match serde_json::from_str(text) {
        Ok(response) => Some(response),
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse subscribe response frame");
            None
        }
    }
}

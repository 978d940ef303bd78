// ── RPC client ──
//
// A single WebSocket connection to the state server. Unary calls are
// issued one at a time; `subscribe` consumes the client.

use futures_core::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{
    ConfigSubscribeRequest, GetRequest, GetResponse, RequestFrame, ResponseBody, ResponseFrame,
    RpcRequest, RpcResponse, SetRequest, SetResponse,
};
use crate::error::Error;
use crate::notification::Notification;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of the state server RPC surface.
pub struct RpcClient {
    socket: WsStream,
    next_id: u64,
}

impl RpcClient {
    /// Connect to a server such as `ws://127.0.0.1:9999`.
    pub async fn connect(url: &Url) -> Result<Self, Error> {
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        tracing::debug!(url = %url, "connected to state server");
        Ok(Self { socket, next_id: 1 })
    }

    pub async fn get(&mut self, request: GetRequest) -> Result<GetResponse, Error> {
        match self.call(RpcRequest::Get(request)).await? {
            RpcResponse::Get(resp) => Ok(resp),
            RpcResponse::Set(_) => Err(unexpected("set response to get request")),
        }
    }

    pub async fn set(&mut self, request: SetRequest) -> Result<SetResponse, Error> {
        match self.call(RpcRequest::Set(request)).await? {
            RpcResponse::Set(resp) => Ok(resp),
            RpcResponse::Get(_) => Err(unexpected("get response to set request")),
        }
    }

    /// Open a configuration subscription. The stream ends when the server
    /// closes the connection.
    pub async fn subscribe(
        mut self,
        request: ConfigSubscribeRequest,
    ) -> Result<impl Stream<Item = Result<Notification, Error>>, Error> {
        let id = self.send(RpcRequest::Subscribe(request)).await?;
        let mut socket = self.socket;
        Ok(async_stream::stream! {
            loop {
                match next_frame(&mut socket).await {
                    Ok(frame) if frame.id != id => {}
                    Ok(ResponseFrame { body: ResponseBody::Notification(n), .. }) => yield Ok(n),
                    Ok(ResponseFrame { body: ResponseBody::Error(status), .. }) => {
                        yield Err(Error::Rpc { code: status.code, message: status.message });
                        break;
                    }
                    Ok(ResponseFrame { body: ResponseBody::Result(_), .. }) => {}
                    Err(Error::ConnectionClosed) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }

    pub async fn close(mut self) -> Result<(), Error> {
        self.socket
            .close(None)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn send(&mut self, request: RpcRequest) -> Result<u64, Error> {
        let id = self.next_id;
        self.next_id += 1;
        let body = serde_json::to_string(&RequestFrame { id, request })?;
        self.socket
            .send(Message::text(body))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        Ok(id)
    }

    async fn call(&mut self, request: RpcRequest) -> Result<RpcResponse, Error> {
        let id = self.send(request).await?;
        loop {
            let frame = next_frame(&mut self.socket).await?;
            if frame.id != id {
                tracing::debug!(id = frame.id, "ignoring frame for another request");
                continue;
            }
            return match frame.body {
                ResponseBody::Result(resp) => Ok(resp),
                ResponseBody::Error(status) => Err(Error::Rpc {
                    code: status.code,
                    message: status.message,
                }),
                ResponseBody::Notification(_) => Err(unexpected("notification to unary request")),
            };
        }
    }
}

async fn next_frame(socket: &mut WsStream) -> Result<ResponseFrame, Error> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: text.to_string(),
                });
            }
            Some(Ok(Message::Close(_))) | None => return Err(Error::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
        }
    }
}

fn unexpected(what: &str) -> Error {
    Error::Deserialization {
        message: format!("unexpected {what}"),
        body: String::new(),
    }
}

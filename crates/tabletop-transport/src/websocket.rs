//! WebSocket peer network using `tokio-tungstenite`.
//!
//! The public identifier of an endpoint is the `host:port` its listener
//! is bound to. Requesting a specific identifier means binding that exact
//! address; an address already in use is reported as
//! [`TransportError::Unavailable`] so callers can fall back to a fresh one.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, ConnectionId, PeerId, PeerNetwork, Transport, TransportError};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

fn io_error(kind: std::io::ErrorKind, e: tokio_tungstenite::tungstenite::Error) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// Opens WebSocket endpoints on a local interface.
#[derive(Debug, Clone)]
pub struct WebSocketNetwork {
    host: String,
}

impl WebSocketNetwork {
    /// Creates a network that binds fresh endpoints on `host` with an
    /// OS-assigned port.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Default for WebSocketNetwork {
    fn default() -> Self {
        Self::new("127.0.0.1")
    }
}

impl PeerNetwork for WebSocketNetwork {
    type Connection = WebSocketConnection;
    type Transport = WebSocketTransport;

    async fn open(&self, requested: Option<&PeerId>) -> Result<WebSocketTransport, TransportError> {
        let addr = match requested {
            Some(id) => id.as_str().to_owned(),
            None => format!("{}:0", self.host),
        };

        let listener = TcpListener::bind(&addr).await.map_err(|e| match (e.kind(), requested) {
            (std::io::ErrorKind::AddrInUse, Some(id)) => TransportError::Unavailable(id.clone()),
            _ => TransportError::AcceptFailed(e),
        })?;
        let local = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        let id = PeerId::new(local.to_string());
        tracing::info!(peer_id = %id, "WebSocket endpoint listening");

        Ok(WebSocketTransport { id, listener })
    }

    async fn connect(&self, target: &PeerId) -> Result<WebSocketConnection, TransportError> {
        let url = format!("ws://{target}");
        let (ws, _) =
            tokio_tungstenite::connect_async(&url)
                .await
                .map_err(|e| TransportError::Unreachable {
                    peer: target.clone(),
                    reason: e.to_string(),
                })?;
        let conn = WebSocketConnection::new(ws);
        tracing::debug!(peer_id = %target, conn_id = %conn.id, "WebSocket connection dialed");
        Ok(conn)
    }
}

/// A listening WebSocket endpoint.
pub struct WebSocketTransport {
    id: PeerId,
    listener: TcpListener,
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    fn local_id(&self) -> &PeerId {
        &self.id
    }

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| TransportError::AcceptFailed(io_error(std::io::ErrorKind::ConnectionRefused, e)))?;

        let conn = WebSocketConnection::new(ws);
        tracing::debug!(conn_id = %conn.id, %addr, "accepted WebSocket connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        // The listener is released when the transport is dropped.
        tracing::debug!(peer_id = %self.id, "WebSocket endpoint shutting down");
        Ok(())
    }
}

/// A single WebSocket connection.
///
/// The sink and stream halves are locked separately so a pending `recv`
/// never holds up a `send`.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(io_error(std::io::ErrorKind::BrokenPipe, e)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

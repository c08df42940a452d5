//! MQTT-over-WebSocket listener using `tokio-tungstenite`.
//!
//! Devices may ask for the `mqtt` subprotocol during the upgrade; it is
//! echoed back so standard MQTT-over-WS clients accept the handshake.
//! Each binary (or text) message carries exactly one packet.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::{Connection, ConnectionId, MAX_FRAME_LEN, Transport, TransportError};

/// WebSocket connection ids start at 1; TCP ids live above `1 << 32`.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";
const MQTT_SUBPROTOCOL: &str = "mqtt";

type WsStream = WebSocketStream<TcpStream>;

/// Listens for device upgrades on a TCP socket.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        tracing::info!(addr, "ws listener bound");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::AcceptFailed)?;
        let upgraded = tokio_tungstenite::accept_hdr_async(tcp, negotiate_subprotocol)
            .await
            .map_err(|e| TransportError::AcceptFailed(io_error(ErrorKind::ConnectionRefused, e)))?;

        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%id, %peer, "ws upgrade complete");

        let (sink, stream) = upgraded.split();
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

fn io_error(kind: ErrorKind, e: tungstenite::Error) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// Echoes `mqtt` when the client offers it among its subprotocols.
fn negotiate_subprotocol(
    request: &Request,
    mut response: Response,
) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get(SUBPROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|p| p.trim() == MQTT_SUBPROTOCOL));
    if offered {
        response
            .headers_mut()
            .insert(SUBPROTOCOL_HEADER, HeaderValue::from_static(MQTT_SUBPROTOCOL));
    }
    Ok(response)
}

/// A single device connection over WebSocket.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| TransportError::SendFailed(io_error(ErrorKind::BrokenPipe, e)))
    }

    /// Next packet frame. Control frames are skipped; a close frame or the
    /// end of the stream is a clean `None`.
    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.stream.lock().await;
        while let Some(frame) = stream.next().await {
            let payload: Vec<u8> = match frame {
                Ok(Message::Binary(bytes)) => bytes.into(),
                Ok(Message::Text(text)) => text.as_bytes().to_vec(),
                Ok(Message::Close(_)) => return Ok(None),
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => {
                    return Err(TransportError::ReceiveFailed(io_error(
                        ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            };
            if payload.len() > MAX_FRAME_LEN {
                return Err(TransportError::FrameTooLarge(payload.len()));
            }
            return Ok(Some(payload));
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.close()
            .await
            .map_err(|e| TransportError::SendFailed(io_error(ErrorKind::BrokenPipe, e)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

//! Listeners that devices connect through.
//!
//! A [`Transport`] yields [`Connection`]s; a connection moves whole frames,
//! one encoded packet each. Both listeners enforce [`MAX_FRAME_LEN`].
//!
//! Features: `websocket` (MQTT over WS, `tokio-tungstenite`) and `tcp`
//! (u32 big-endian length prefix). Both are on by default.

mod error;
#[cfg(feature = "tcp")]
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "tcp")]
pub use tcp::{TcpConnection, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// 1 MiB.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Process-unique id of a device connection, used as the broker owner key
/// for MQTT sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A bound listener.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Waits for the next device. For WebSocket this includes the upgrade
    /// handshake.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// One device link.
///
/// Reads and writes lock separately: the forwarder can push a `Deliver`
/// while the session task is parked in `recv`.
pub trait Connection: Send + Sync + 'static {
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// `Ok(None)` means the peer closed cleanly.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn id(&self) -> ConnectionId;
}

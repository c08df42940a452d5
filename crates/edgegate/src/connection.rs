//! Per-connection task: packets in, hooks called, replies out.
//!
//! Each accepted connection gets its own Tokio task running [`serve`].
//! The flow is:
//!   1. Receive `Connect` → `auth_connect` → `connect` → send `ConnAck`
//!   2. Loop: receive packets → dispatch to the session hooks
//!   3. On any exit (clean close, `Disconnect`, decode failure, read
//!      error, idle timeout, gateway shutdown, task abort) → `disconnect`
//!
//! Deliveries from the local broker are written by a second task that
//! drains the session's bounded notification queue, so a device blocked
//! in a long read still receives forwarded messages.

use std::sync::Arc;
use std::time::Duration;

use edgegate_auth::{Authenticator, Authorizer};
use edgegate_bus::{Notification, NotificationSender, Publisher, DEFAULT_QUEUE_DEPTH};
use edgegate_protocol::{codes, Codec, JsonCodec, Packet, Protocol, ProtocolError};
use edgegate_transport::Connection;
use tokio::sync::mpsc;

use crate::events::EventStore;
use crate::handler::{Handler, Services};
use crate::runtime::Shutdown;
use crate::GatewayError;

/// Limits applied to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// How long a new connection has to send `Connect`.
    pub connect_timeout: Duration,
    /// How long a connected session may stay silent.
    pub idle_timeout: Duration,
    /// Deliveries buffered for a device that is slow to read. Further
    /// messages are dropped until it catches up.
    pub delivery_queue: usize,
    /// How long a listener waits at shutdown for its sessions to finish
    /// their disconnect before aborting them.
    pub drain_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(90),
            delivery_queue: DEFAULT_QUEUE_DEPTH,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Owns the handler so that `disconnect` runs however the task ends.
///
/// The normal path calls [`finish`](Self::finish). If the task is aborted
/// or panics, `Drop` spawns the disconnect instead, since `Drop` can't
/// await.
struct DisconnectGuard<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    handler: Option<Handler<A, Z, P, E>>,
}

impl<A, Z, P, E> DisconnectGuard<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    async fn finish(mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler.disconnect().await;
        }
    }
}

impl<A, Z, P, E> Drop for DisconnectGuard<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    fn drop(&mut self) {
        let Some(mut handler) = self.handler.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                handler.disconnect().await;
            });
        }
    }
}

/// Serves one connection from accept to close.
///
/// Returns once the device leaves or `shutdown` fires; in both cases the
/// session's `disconnect` has completed by then.
pub async fn serve<C, A, Z, P, E>(
    conn: C,
    services: Arc<Services<A, Z, P, E>>,
    protocol: Protocol,
    settings: ConnectionSettings,
    mut shutdown: Shutdown,
) -> Result<(), GatewayError>
where
    C: Connection,
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, %protocol, "handling new connection");

    let mut guard = DisconnectGuard {
        handler: Some(Handler::new(services, conn_id, protocol)),
    };
    let (tx, rx) = mpsc::channel(settings.delivery_queue.max(1));
    let mut writer = None;

    let result = async {
        let Some(handler) = guard.handler.as_mut() else {
            return Ok(());
        };

        // --- Step 1: Connect ---
        let secret = tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            received = receive_connect(conn.as_ref(), &settings) => received?,
        };
        if let Err(e) = handler.auth_connect(&secret).await {
            send(conn.as_ref(), &Packet::error(codes::UNAUTHORIZED, "unauthorized")).await?;
            return Err(e);
        }
        handler.connect().await?;
        send(conn.as_ref(), &Packet::ConnAck).await?;

        // --- Step 2: Deliveries ---
        writer = Some(tokio::spawn(write_deliveries(Arc::clone(&conn), rx)));

        // --- Step 3: Packet loop ---
        packet_loop(conn.as_ref(), handler, &tx, &settings, &mut shutdown).await
    }
    .await;

    drop(tx);
    guard.finish().await;
    if let Some(writer) = writer {
        writer.abort();
    }
    // Best effort: the peer may already be gone.
    let _ = conn.close().await;

    if let Err(e) = &result {
        tracing::debug!(%conn_id, error = %e, "connection ended with error");
    }
    result
}

/// Waits for the opening `Connect` and returns its secret.
async fn receive_connect<C: Connection>(
    conn: &C,
    settings: &ConnectionSettings,
) -> Result<String, GatewayError> {
    let data = match tokio::time::timeout(settings.connect_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidPacket(
                "connection closed before connect".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(GatewayError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidPacket("connect timed out".into()).into());
        }
    };

    match JsonCodec.decode::<Packet>(&data) {
        Ok(Packet::Connect { secret }) => Ok(secret),
        Ok(_) => {
            send(conn, &Packet::error(codes::BAD_PACKET, "expected Connect")).await?;
            Err(ProtocolError::InvalidPacket("first packet must be Connect".into()).into())
        }
        Err(e) => {
            send(conn, &Packet::error(codes::BAD_PACKET, "malformed packet")).await?;
            Err(e.into())
        }
    }
}

async fn packet_loop<C, A, Z, P, E>(
    conn: &C,
    handler: &Handler<A, Z, P, E>,
    tx: &NotificationSender,
    settings: &ConnectionSettings,
    shutdown: &mut Shutdown,
) -> Result<(), GatewayError>
where
    C: Connection,
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    let conn_id = conn.id();
    loop {
        let received = tokio::select! {
            _ = shutdown.wait() => {
                tracing::debug!(%conn_id, "closing session for shutdown");
                return Ok(());
            }
            received = tokio::time::timeout(settings.idle_timeout, conn.recv()) => received,
        };
        let data = match received {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                return Ok(());
            }
            Ok(Err(e)) => return Err(GatewayError::Transport(e)),
            Err(_) => {
                tracing::info!(%conn_id, "connection idle timeout");
                return Ok(());
            }
        };

        let packet: Packet = match JsonCodec.decode(&data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode packet");
                send(conn, &Packet::error(codes::BAD_PACKET, "malformed packet")).await?;
                return Err(e.into());
            }
        };

        let reply = match packet {
            Packet::Publish { topic, payload } => {
                let outcome = match handler.auth_publish(&topic).await {
                    Ok(grant) => handler.publish(grant, payload).await,
                    Err(e) => Err(e),
                };
                outcome.err().map(|e| error_packet(&e))
            }
            Packet::Subscribe { topics } => {
                let outcome = match handler.auth_subscribe(&topics).await {
                    Ok(grants) => handler.subscribe(grants, tx.clone()).await,
                    Err(e) => Err(e),
                };
                Some(match outcome {
                    Ok(topics) => Packet::SubAck { topics },
                    Err(e) => error_packet(&e),
                })
            }
            Packet::Unsubscribe { topics } => {
                let outcome = match handler.auth_unsubscribe(&topics).await {
                    Ok(grants) => handler.unsubscribe(grants).await,
                    Err(e) => Err(e),
                };
                Some(match outcome {
                    Ok(topics) => Packet::UnsubAck { topics },
                    Err(e) => error_packet(&e),
                })
            }
            Packet::Ping => Some(Packet::Pong),
            Packet::Disconnect => {
                tracing::debug!(%conn_id, "device disconnected");
                return Ok(());
            }
            Packet::Connect { .. } => {
                send(conn, &Packet::error(codes::BAD_PACKET, "already connected")).await?;
                return Err(ProtocolError::InvalidPacket("duplicate Connect".into()).into());
            }
            other => {
                tracing::debug!(%conn_id, ?other, "ignoring gateway-bound packet");
                Some(Packet::error(codes::BAD_PACKET, "unexpected packet"))
            }
        };

        if let Some(reply) = reply {
            send(conn, &reply).await?;
        }
    }
}

/// Drains broker notifications onto the connection.
async fn write_deliveries<C: Connection>(
    conn: Arc<C>,
    mut rx: mpsc::Receiver<Notification>,
) {
    while let Some(notification) = rx.recv().await {
        let packet = Packet::Deliver {
            topic: notification.topic,
            payload: notification.message.payload,
        };
        if let Err(e) = send(conn.as_ref(), &packet).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "delivery failed");
            break;
        }
    }
}

fn error_packet(err: &GatewayError) -> Packet {
    let code = match err {
        GatewayError::Authorization(_) => codes::FORBIDDEN,
        GatewayError::Forwarding(_) => codes::UNAVAILABLE,
        GatewayError::Authentication(_) => codes::UNAUTHORIZED,
        _ => codes::BAD_PACKET,
    };
    Packet::error(code, err.to_string())
}

async fn send<C: Connection>(conn: &C, packet: &Packet) -> Result<(), GatewayError> {
    let bytes = JsonCodec.encode(packet)?;
    conn.send(&bytes).await?;
    Ok(())
}

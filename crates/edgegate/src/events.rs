//! Lifecycle event sinks.
//!
//! Every successful connect, disconnect, subscribe and unsubscribe is
//! recorded as an [`Event`] for presence tracking. Recording is best
//! effort: the handler logs a failed write and carries on.

use std::future::Future;
use std::sync::{Arc, Mutex};

use edgegate_protocol::{Codec, Event, JsonCodec, ProtocolError};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Errors from an [`EventStore`].
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] ProtocolError),

    #[error("failed to write event: {0}")]
    Io(#[from] std::io::Error),

    #[error("event store unavailable: {0}")]
    Unavailable(String),
}

/// An append-only sink for lifecycle events.
pub trait EventStore: Send + Sync + 'static {
    fn record(&self, event: Event) -> impl Future<Output = Result<(), EventStoreError>> + Send;
}

impl<T: EventStore> EventStore for Arc<T> {
    fn record(&self, event: Event) -> impl Future<Output = Result<(), EventStoreError>> + Send {
        (**self).record(event)
    }
}

/// Keeps events in memory. For tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything recorded so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventStore for MemoryEventStore {
    async fn record(&self, event: Event) -> Result<(), EventStoreError> {
        self.events
            .lock()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".into()))?
            .push(event);
        Ok(())
    }
}

/// Writes one JSON object per line to any async writer (stdout, a file,
/// a socket).
pub struct JsonLinesEventStore<W> {
    writer: tokio::sync::Mutex<W>,
    codec: JsonCodec,
}

impl<W> JsonLinesEventStore<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            codec: JsonCodec,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W> EventStore for JsonLinesEventStore<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn record(&self, event: Event) -> Result<(), EventStoreError> {
        let mut line = self.codec.encode(&event)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use edgegate_protocol::{ClientId, Operation, Protocol};

    use super::*;

    #[tokio::test]
    async fn test_memory_store_keeps_order() {
        let store = MemoryEventStore::new();
        for op in [Operation::Connect, Operation::Disconnect] {
            store
                .record(Event::session(op, ClientId::new("d"), Protocol::Mqtt, "i"))
                .await
                .unwrap();
        }
        let ops: Vec<_> = store.events().iter().map(|e| e.operation).collect();
        assert_eq!(ops, [Operation::Connect, Operation::Disconnect]);
    }

    #[tokio::test]
    async fn test_json_lines_writes_one_object_per_line() {
        let store = JsonLinesEventStore::new(Vec::new());
        store
            .record(Event::session(
                Operation::Connect,
                ClientId::new("dev-1"),
                Protocol::Ws,
                "edge-1",
            ))
            .await
            .unwrap();
        store
            .record(Event::session(
                Operation::Disconnect,
                ClientId::new("dev-1"),
                Protocol::Ws,
                "edge-1",
            ))
            .await
            .unwrap();

        let out = String::from_utf8(store.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["operation"], "connect");
        assert_eq!(first["client_id"], "dev-1");
        assert_eq!(first["protocol"], "ws");
        assert_eq!(first["instance"], "edge-1");
        assert!(first.get("channel").is_none());
    }
}

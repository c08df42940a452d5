//! The publish/subscribe capabilities the gateway consumes.
//!
//! The gateway only needs two things from the internal bus: hand a
//! [`Message`] to a subject, and receive everything matching a pattern.
//! [`MemoryBus`](crate::MemoryBus) implements both in-process; a client
//! for an external broker would implement the same traits.

use std::future::Future;
use std::sync::Arc;

use edgegate_protocol::Message;
use tokio::sync::mpsc;

use crate::BusError;

/// A message received from a subscription, with the subject it was
/// published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subject: String,
    pub message: Message,
}

/// Hands messages to the bus.
pub trait Publisher: Send + Sync + 'static {
    /// Publishes `message` on the concrete `subject`.
    ///
    /// At-most-once: a returned `Ok` means the bus accepted the message,
    /// not that anyone received it.
    fn publish(
        &self,
        subject: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Opens subscriptions on the bus.
pub trait Subscriber: Send + Sync + 'static {
    /// Subscribes to every subject matching `pattern` (`*`, `>` allowed).
    fn subscribe(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<Subscription, BusError>> + Send;
}

impl<T: Publisher> Publisher for Arc<T> {
    fn publish(
        &self,
        subject: &str,
        message: Message,
    ) -> impl Future<Output = Result<(), BusError>> + Send {
        (**self).publish(subject, message)
    }
}

impl<T: Subscriber> Subscriber for Arc<T> {
    fn subscribe(
        &self,
        pattern: &str,
    ) -> impl Future<Output = Result<Subscription, BusError>> + Send {
        (**self).subscribe(pattern)
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    pattern: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wraps a delivery channel. `on_drop` runs once when the
    /// subscription is dropped, so implementations can deregister it.
    pub fn new(
        pattern: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            receiver,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Waits for the next delivery. `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Returns a delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

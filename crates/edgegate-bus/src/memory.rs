//! In-process bus.
//!
//! Every subscription gets its own unbounded channel. A publish walks the
//! registry, sends a copy to each subscription whose pattern matches, and
//! prunes registrations whose receiver is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use edgegate_protocol::Message;
use tokio::sync::mpsc;

use crate::subject::{is_valid_pattern, is_valid_subject, subject_matches};
use crate::{BusError, Delivery, Publisher, Subscriber, Subscription};

struct Registration {
    pattern: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Registry {
    subscriptions: RwLock<HashMap<u64, Registration>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    published: AtomicU64,
}

/// A cloneable handle to an in-process bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    registry: Arc<Registry>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .subscriptions
            .read()
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Total messages accepted since creation.
    pub fn published(&self) -> u64 {
        self.registry.published.load(Ordering::Relaxed)
    }

    /// Closes the bus. Open subscriptions drain and then yield `None`;
    /// later publishes and subscribes fail with [`BusError::Closed`].
    pub fn close(&self) {
        self.registry.closed.store(true, Ordering::SeqCst);
        if let Ok(mut subs) = self.registry.subscriptions.write() {
            subs.clear();
        }
        tracing::debug!("memory bus closed");
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.registry.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }
}

impl Publisher for MemoryBus {
    async fn publish(&self, subject: &str, message: Message) -> Result<(), BusError> {
        self.ensure_open()?;
        if !is_valid_subject(subject) {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }

        let mut gone = Vec::new();
        let mut receivers = 0usize;
        {
            let subs = self.registry.subscriptions.read().map_err(|_| {
                BusError::PublishFailed {
                    subject: subject.to_string(),
                    reason: "registry lock poisoned".into(),
                }
            })?;
            for (id, registration) in subs.iter() {
                if !subject_matches(&registration.pattern, subject) {
                    continue;
                }
                let delivery = Delivery {
                    subject: subject.to_string(),
                    message: message.clone(),
                };
                if registration.sender.send(delivery).is_ok() {
                    receivers += 1;
                } else {
                    gone.push(*id);
                }
            }
        }
        if !gone.is_empty() {
            if let Ok(mut subs) = self.registry.subscriptions.write() {
                for id in gone {
                    subs.remove(&id);
                }
            }
        }

        self.registry.published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(subject, receivers, "published");
        Ok(())
    }
}

impl Subscriber for MemoryBus {
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        self.ensure_open()?;
        if !is_valid_pattern(pattern) {
            return Err(BusError::InvalidSubject(pattern.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .subscriptions
            .write()
            .map_err(|_| BusError::Closed)?
            .insert(
                id,
                Registration {
                    pattern: pattern.to_string(),
                    sender,
                },
            );
        tracing::debug!(pattern, id, "subscription opened");

        let registry = Arc::downgrade(&self.registry);
        Ok(Subscription::new(pattern, receiver, move || {
            if let Some(registry) = registry.upgrade() {
                if let Ok(mut subs) = registry.subscriptions.write() {
                    subs.remove(&id);
                }
            }
        }))
    }
}

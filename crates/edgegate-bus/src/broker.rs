//! The local edge broker: fans forwarded bus traffic out to connected
//! devices.
//!
//! Each device subscription (or CoAP observer) is one registration keyed
//! by `(owner, token)`:
//!
//! - `owner` is the session or device key that made the registration and
//!   is used to drop everything it holds when it goes away;
//! - `token` distinguishes several registrations of the same owner (the
//!   MQTT filter itself, or a CoAP observe token).
//!
//! Registrations hold an MQTT filter on edge topics
//! (`channels/{id}/messages/...`) and the sender half of the owner's
//! outbound queue. Queues are bounded; delivery is at most once, so a
//! message for a full queue is dropped rather than buffered.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use edgegate_protocol::Message;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::BusError;
use crate::subject::filter_matches;

/// A message pushed to one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The edge topic the message was published on.
    pub topic: String,
    /// The registration token that matched.
    pub token: String,
    pub message: Message,
}

/// Channel sender for delivering notifications to a session or observer.
pub type NotificationSender = mpsc::Sender<Notification>;

/// Default depth of a session's or observer's notification queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Where the forwarder republishes bus traffic.
pub trait Downstream: Send + Sync + 'static {
    /// Publishes `message` on the edge `topic`. Returns the number of
    /// registrations it was delivered to.
    fn publish(
        &self,
        topic: &str,
        message: &Message,
    ) -> impl Future<Output = Result<usize, BusError>> + Send;
}

impl<T: Downstream> Downstream for Arc<T> {
    fn publish(
        &self,
        topic: &str,
        message: &Message,
    ) -> impl Future<Output = Result<usize, BusError>> + Send {
        (**self).publish(topic, message)
    }
}

struct Registration {
    filter: String,
    sender: NotificationSender,
}

type Key = (String, String);

/// In-process edge broker. Cheap to clone.
#[derive(Clone, Default)]
pub struct LocalBroker {
    registrations: Arc<RwLock<HashMap<Key, Registration>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) `owner`'s registration `token` with an MQTT
    /// `filter`.
    pub fn register(
        &self,
        owner: &str,
        token: &str,
        filter: &str,
        sender: NotificationSender,
    ) -> Result<(), BusError> {
        let mut regs = self.write()?;
        let replaced = regs
            .insert(
                (owner.to_string(), token.to_string()),
                Registration {
                    filter: filter.to_string(),
                    sender,
                },
            )
            .is_some();
        tracing::debug!(owner, token, filter, replaced, "broker registration added");
        Ok(())
    }

    /// Registers several `(token, filter)` pairs for `owner` under one
    /// lock: either all of them are added or none.
    pub fn register_all(
        &self,
        owner: &str,
        entries: &[(String, String)],
        sender: &NotificationSender,
    ) -> Result<(), BusError> {
        let mut regs = self.write()?;
        for (token, filter) in entries {
            regs.insert(
                (owner.to_string(), token.clone()),
                Registration {
                    filter: filter.clone(),
                    sender: sender.clone(),
                },
            );
        }
        tracing::debug!(owner, count = entries.len(), "broker registrations added");
        Ok(())
    }

    /// Removes one registration. Returns whether it existed.
    pub fn deregister(&self, owner: &str, token: &str) -> Result<bool, BusError> {
        let removed = self
            .write()?
            .remove(&(owner.to_string(), token.to_string()))
            .is_some();
        Ok(removed)
    }

    /// Removes `(owner, token)` only if it was registered with exactly
    /// `filter`. Returns whether it was removed.
    pub fn deregister_filter(
        &self,
        owner: &str,
        token: &str,
        filter: &str,
    ) -> Result<bool, BusError> {
        let mut regs = self.write()?;
        let key = (owner.to_string(), token.to_string());
        match regs.get(&key) {
            Some(registration) if registration.filter == filter => {
                regs.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Removes every registration held by `owner`. Returns how many.
    pub fn deregister_owner(&self, owner: &str) -> usize {
        let Ok(mut regs) = self.registrations.write() else {
            return 0;
        };
        let before = regs.len();
        regs.retain(|(o, _), _| o != owner);
        before - regs.len()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Key, Registration>>, BusError> {
        self.registrations
            .write()
            .map_err(|_| BusError::Closed)
    }
}

impl Downstream for LocalBroker {
    async fn publish(&self, topic: &str, message: &Message) -> Result<usize, BusError> {
        let mut gone = Vec::new();
        let mut delivered = 0;
        {
            let regs = self.registrations.read().map_err(|_| BusError::Closed)?;
            for (key, registration) in regs.iter() {
                if !filter_matches(&registration.filter, topic) {
                    continue;
                }
                let notification = Notification {
                    topic: topic.to_string(),
                    token: key.1.clone(),
                    message: message.clone(),
                };
                match registration.sender.try_send(notification) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(owner = %key.0, token = %key.1, topic, "queue full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => gone.push(key.clone()),
                }
            }
        }
        if !gone.is_empty() {
            let mut regs = self.write()?;
            for key in gone {
                tracing::debug!(owner = %key.0, token = %key.1, "dropping closed registration");
                regs.remove(&key);
            }
        }
        Ok(delivered)
    }
}

//! Message bus plumbing for edgegate.
//!
//! Two directions, two halves:
//!
//! - **inbound** (device → platform): the session handler hands messages
//!   to a [`Publisher`] on `{prefix}.{channel}.{subtopic}` subjects;
//! - **outbound** (platform → device): the forwarder holds a
//!   [`Subscription`] on `{prefix}.>` and republishes each message to a
//!   [`Downstream`], normally the [`LocalBroker`] that fans it out to
//!   subscribed devices.
//!
//! # Key types
//!
//! - [`Publisher`] / [`Subscriber`]: the bus capabilities
//! - [`MemoryBus`]: in-process implementation of both
//! - [`LocalBroker`]: edge fan-out keyed by `(owner, token)`
//! - [`subject`]: NATS-style and MQTT-style matching

mod broker;
mod bus;
mod error;
mod memory;
pub mod subject;

pub use broker::{DEFAULT_QUEUE_DEPTH, Downstream, LocalBroker, Notification, NotificationSender};
pub use bus::{Delivery, Publisher, Subscriber, Subscription};
pub use error::BusError;
pub use memory::MemoryBus;

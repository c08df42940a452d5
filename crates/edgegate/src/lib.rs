//! # Edgegate
//!
//! An IoT session gateway between edge devices and an internal message bus.
//!
//! Devices connect over MQTT (length-prefixed TCP) or MQTT over WebSocket,
//! authenticate with a secret, and publish or subscribe on
//! `channels/{channel}/messages[/{subtopic}]` topics. The gateway
//! authenticates through a TTL cache, authorizes every channel operation,
//! translates topics to bus subjects, and forwards bus traffic back to
//! subscribed devices. Lifecycle events go to an event store.
//!
//! ```text
//! device ─► listener ─► connection::serve ─► Handler ─► Publisher (bus)
//!                                               │
//!                                          EventStore
//! bus ─► Forwarder ─► LocalBroker ─► subscribed sessions / observers
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgegate::prelude::*;
//!
//! # async fn start() -> Result<(), GatewayError> {
//! let bus = MemoryBus::new();
//! let auth = AuthCache::new(
//!     MemoryCache::new(),
//!     StaticIdentityStore::new().with_thing("s3cr3t", ClientId::new("thing-A")),
//!     AuthCacheConfig::default(),
//! );
//! let policy = StaticPolicy::new().allow(Rule::new("thing-A", "*", Action::Publish));
//!
//! let gateway = GatewayBuilder::new()
//!     .mqtt_addr("0.0.0.0:1883")
//!     .ws_addr("0.0.0.0:8080")
//!     .build(auth, policy, bus.clone(), &bus, MemoryEventStore::new())
//!     .await?;
//! gateway.run().await
//! # }
//! ```

pub mod config;
pub mod connection;
mod error;
pub mod events;
pub mod forwarder;
pub mod handler;
pub mod instrument;
pub mod observe;
pub mod retry;
pub mod runtime;
pub mod server;

pub use config::GatewayConfig;
pub use connection::{serve, ConnectionSettings};
pub use error::{Denial, GatewayError};
pub use events::{EventStore, EventStoreError, JsonLinesEventStore, MemoryEventStore};
pub use forwarder::Forwarder;
pub use handler::{Authorized, Handler, HandlerSettings, Services, Session, SessionState};
pub use instrument::{Instrumented, Metrics};
pub use observe::{ObserveAdapter, ObserveService, Observer};
pub use retry::{retry_notify, wait_until_ready, HealthCheckError, HttpHealthCheck, HealthCheck, RetryPolicy};
pub use runtime::{watch_signals, Shutdown, ShutdownController, TaskGroup};
pub use server::{serve_listener, Gateway, GatewayBuilder};

/// Everything needed to wire and run a gateway.
pub mod prelude {
    pub use crate::{
        ConnectionSettings, EventStore, Gateway, GatewayBuilder, GatewayConfig, GatewayError,
        Instrumented, JsonLinesEventStore, MemoryEventStore, Metrics, ObserveService, Observer,
        HttpHealthCheck, RetryPolicy,
    };
    pub use edgegate_auth::{
        Action, AuthCache, AuthCacheConfig, Authenticator, Authorizer, IdentityStore,
        MemoryCache, Rule, StaticIdentityStore, StaticPolicy,
    };
    pub use edgegate_bus::{LocalBroker, MemoryBus, Publisher, Subscriber};
    pub use edgegate_protocol::{
        codes, ChannelId, ClientId, Event, Message, Operation, Packet, Protocol,
    };
}

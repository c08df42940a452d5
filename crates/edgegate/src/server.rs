//! `Gateway` builder and top-level run loop.
//!
//! This ties the layers together: two listeners (MQTT over length-prefixed
//! TCP, MQTT over WebSocket) feeding per-connection [`serve`] tasks, and
//! the [`Forwarder`] pushing bus traffic to the local broker. All of them
//! run in one fail-fast [`TaskGroup`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use edgegate_auth::{Authenticator, Authorizer};
use edgegate_bus::{LocalBroker, Publisher, Subscriber};
use edgegate_protocol::Protocol;
use edgegate_transport::{TcpTransport, Transport, WebSocketTransport};
use tokio::task::JoinSet;

use crate::connection::{serve, ConnectionSettings};
use crate::events::EventStore;
use crate::forwarder::Forwarder;
use crate::handler::{HandlerSettings, Services};
use crate::observe::ObserveAdapter;
use crate::runtime::{watch_signals, Shutdown, ShutdownController, TaskGroup};
use crate::GatewayError;

/// Builder for configuring and starting a gateway.
///
/// # Example
///
/// ```rust,ignore
/// use edgegate::prelude::*;
///
/// let bus = MemoryBus::new();
/// let gateway = GatewayBuilder::new()
///     .mqtt_addr("0.0.0.0:1883")
///     .ws_addr("0.0.0.0:8080")
///     .build(auth, policy, bus.clone(), &bus, MemoryEventStore::new())
///     .await?;
/// gateway.run().await
/// ```
pub struct GatewayBuilder {
    mqtt_addr: String,
    ws_addr: String,
    handler: HandlerSettings,
    connection: ConnectionSettings,
    forwarder_timeout: Duration,
    grace: Duration,
    handle_signals: bool,
}

impl GatewayBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            mqtt_addr: "127.0.0.1:1883".to_string(),
            ws_addr: "127.0.0.1:8080".to_string(),
            handler: HandlerSettings::default(),
            connection: ConnectionSettings::default(),
            forwarder_timeout: Duration::from_secs(30),
            grace: Duration::from_secs(10),
            handle_signals: true,
        }
    }

    pub fn mqtt_addr(mut self, addr: &str) -> Self {
        self.mqtt_addr = addr.to_string();
        self
    }

    pub fn ws_addr(mut self, addr: &str) -> Self {
        self.ws_addr = addr.to_string();
        self
    }

    /// Instance id stamped on every lifecycle event.
    pub fn instance(mut self, instance: &str) -> Self {
        self.handler.instance = instance.to_string();
        self
    }

    pub fn subject_prefix(mut self, prefix: &str) -> Self {
        self.handler.subject_prefix = prefix.to_string();
        self
    }

    pub fn connection_settings(mut self, settings: ConnectionSettings) -> Self {
        self.connection = settings;
        self
    }

    /// Upper bound on one downstream publish by the forwarder.
    pub fn forwarder_timeout(mut self, timeout: Duration) -> Self {
        self.forwarder_timeout = timeout;
        self
    }

    /// How long tasks get to stop after shutdown before being aborted.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether [`Gateway::run`] stops on SIGINT/SIGTERM. Default: on.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Binds both listeners and opens the forwarder subscription.
    ///
    /// # Errors
    /// [`GatewayError::Startup`] if a listener cannot bind or the bus
    /// refuses the forwarder subscription.
    pub async fn build<A, Z, P, E, S>(
        self,
        auth: A,
        policy: Z,
        publisher: P,
        subscriber: &S,
        events: E,
    ) -> Result<Gateway<A, Z, P, E>, GatewayError>
    where
        A: Authenticator,
        Z: Authorizer,
        P: Publisher,
        E: EventStore,
        S: Subscriber,
    {
        let mqtt = TcpTransport::bind(&self.mqtt_addr)
            .await
            .map_err(|e| GatewayError::Startup(format!("MQTT listener: {e}")))?;
        let ws = WebSocketTransport::bind(&self.ws_addr)
            .await
            .map_err(|e| GatewayError::Startup(format!("WebSocket listener: {e}")))?;
        let forwarder =
            Forwarder::subscribe(subscriber, &self.handler.subject_prefix, self.forwarder_timeout)
                .await?;

        let services = Arc::new(Services {
            auth,
            policy,
            publisher,
            events,
            broker: LocalBroker::new(),
            settings: self.handler,
        });

        Ok(Gateway {
            mqtt,
            ws,
            forwarder,
            services,
            controller: ShutdownController::new(),
            connection: self.connection,
            grace: self.grace,
            handle_signals: self.handle_signals,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, ready-to-run gateway.
///
/// Call [`run()`](Self::run) to start serving.
pub struct Gateway<A, Z, P, E> {
    mqtt: TcpTransport,
    ws: WebSocketTransport,
    forwarder: Forwarder,
    services: Arc<Services<A, Z, P, E>>,
    controller: ShutdownController,
    connection: ConnectionSettings,
    grace: Duration,
    handle_signals: bool,
}

impl<A, Z, P, E> Gateway<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    /// Creates a new builder.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn mqtt_addr(&self) -> std::io::Result<SocketAddr> {
        self.mqtt.local_addr()
    }

    pub fn ws_addr(&self) -> std::io::Result<SocketAddr> {
        self.ws.local_addr()
    }

    pub fn services(&self) -> &Arc<Services<A, Z, P, E>> {
        &self.services
    }

    /// A handle that stops [`run`](Self::run) from outside.
    pub fn shutdown_controller(&self) -> ShutdownController {
        self.controller.clone()
    }

    /// An observe service sharing this gateway's broker and policy.
    pub fn observe(&self) -> ObserveAdapter<A, Z, P, E> {
        ObserveAdapter::new(Arc::clone(&self.services))
    }

    /// Runs until shutdown is requested or a task fails.
    ///
    /// # Errors
    /// The first failure among the listeners and the forwarder, or
    /// [`GatewayError::Shutdown`] if one of them stopped unprompted.
    pub async fn run(self) -> Result<(), GatewayError> {
        let controller = self.controller;
        let mut group = TaskGroup::new(controller.clone()).with_grace(self.grace);

        group.spawn(
            "mqtt listener",
            serve_listener(
                self.mqtt,
                Arc::clone(&self.services),
                Protocol::Mqtt,
                self.connection.clone(),
                controller.subscribe(),
            ),
        );
        group.spawn(
            "ws listener",
            serve_listener(
                self.ws,
                Arc::clone(&self.services),
                Protocol::Ws,
                self.connection,
                controller.subscribe(),
            ),
        );
        group.spawn(
            "forwarder",
            self.forwarder
                .run(self.services.broker.clone(), controller.subscribe()),
        );
        if self.handle_signals {
            group.spawn(
                "signals",
                watch_signals(controller.clone(), controller.subscribe()),
            );
        }

        tracing::info!(tasks = group.len(), "gateway running");
        let result = group.wait().await;
        tracing::info!("gateway stopped");
        result
    }
}

/// Accepts connections until shutdown, one [`serve`] task each.
///
/// On shutdown every session sees the same signal and finishes its
/// disconnect; this returns once they have all ended. Sessions still open
/// after `drain_timeout` are aborted.
pub async fn serve_listener<T, A, Z, P, E>(
    mut transport: T,
    services: Arc<Services<A, Z, P, E>>,
    protocol: Protocol,
    settings: ConnectionSettings,
    mut shutdown: Shutdown,
) -> Result<(), GatewayError>
where
    T: Transport,
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    let addr = transport.local_addr().ok();
    tracing::info!(?addr, %protocol, "listener started");
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait() => break,
            accepted = transport.accept() => accepted,
        };
        while connections.try_join_next().is_some() {}

        match accepted {
            Ok(conn) => {
                let services = Arc::clone(&services);
                let settings = settings.clone();
                let session_shutdown = shutdown.clone();
                connections.spawn(async move {
                    if let Err(e) = serve(conn, services, protocol, settings, session_shutdown).await {
                        tracing::debug!(error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, %protocol, "accept failed");
            }
        }
    }

    tracing::info!(?addr, %protocol, open = connections.len(), "listener stopping");
    let drained = tokio::time::timeout(settings.drain_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(%protocol, remaining = connections.len(), "sessions did not close in time, aborting");
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
    Ok(())
}

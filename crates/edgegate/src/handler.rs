//! The session handler: authorization and translation for one device
//! session.
//!
//! ```text
//!   New ──auth_connect──→ Connecting ──connect──→ Connected ──disconnect──→ Disconnected
//!    │                        │                                               ▲
//!    └──(auth failure)────────┴──→ Rejected                 New/Connecting ───┘
//! ```
//!
//! Hooks are called sequentially by the task that owns the connection.
//! Every channel operation is split in two: an `auth_*` hook that parses
//! the topic and checks the policy, returning an [`Authorized`] value, and
//! the operation hook that consumes it. Nothing reaches the bus or the
//! local broker without an `Authorized` for the exact channel and action.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use edgegate_auth::{Action, AuthError, Authenticator, Authorizer};
use edgegate_bus::{LocalBroker, NotificationSender, Publisher};
use edgegate_protocol::{
    topic, Channel, ClientId, Event, Message, Operation, Protocol,
};

use crate::events::EventStore;
use crate::GatewayError;

/// Per-gateway settings the handler stamps onto messages and events.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Adapter instance id recorded on every event.
    pub instance: String,
    /// Bus subject prefix (`{prefix}.{channel}.{subtopic}`).
    pub subject_prefix: String,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            instance: String::new(),
            subject_prefix: "mqtt".to_string(),
        }
    }
}

/// The collaborators shared by every session.
///
/// Wrapped in `Arc` so it can be cheaply cloned across connection tasks.
/// Each collaborator is itself safe for unbounded concurrent use.
pub struct Services<A, Z, P, E> {
    pub auth: A,
    pub policy: Z,
    pub publisher: P,
    pub events: E,
    pub broker: LocalBroker,
    pub settings: HandlerSettings,
}

impl<A, Z, P, E> Services<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    /// Checks `client_id` may perform `action` on `channel`.
    pub(crate) async fn authorize(
        &self,
        client_id: &ClientId,
        channel: Channel,
        action: Action,
    ) -> Result<Authorized, GatewayError> {
        self.policy
            .authorize(client_id, &channel.id, action)
            .await
            .map_err(|e| {
                tracing::warn!(%client_id, %channel, %action, error = %e, "operation denied");
                GatewayError::denied(e)
            })?;
        Ok(Authorized { channel, action })
    }

    /// Records `event`, logging instead of failing.
    pub(crate) async fn emit(&self, event: Event) {
        let operation = event.operation;
        let client_id = event.client_id.clone();
        if let Err(error) = self.events.record(event).await {
            tracing::warn!(%client_id, %operation, %error, "failed to record event");
        }
    }
}

/// Proof that a channel operation passed authorization.
///
/// Only this module can build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    channel: Channel,
    action: Action,
}

impl Authorized {
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn action(&self) -> Action {
        self.action
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    /// Authenticated, `connect` not yet called.
    Connecting,
    Connected,
    Disconnected,
    Rejected,
}

/// The server's record of one device connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Bound after a successful `auth_connect`.
    pub client_id: Option<ClientId>,
    pub secret: String,
    pub protocol: Protocol,
    pub connected_at: Option<Instant>,
    pub state: SessionState,
}

/// Drives one session through its hooks.
pub struct Handler<A, Z, P, E> {
    services: Arc<Services<A, Z, P, E>>,
    /// Key for this session's local broker registrations.
    owner: String,
    session: Session,
}

impl<A, Z, P, E> Handler<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    /// Creates a handler for a new session. `session_id` must be unique
    /// among live sessions (the connection id works); broker registrations
    /// are keyed `session:{session_id}`.
    pub fn new(
        services: Arc<Services<A, Z, P, E>>,
        session_id: impl fmt::Display,
        protocol: Protocol,
    ) -> Self {
        Self {
            services,
            owner: format!("session:{session_id}"),
            session: Session {
                client_id: None,
                secret: String::new(),
                protocol,
                connected_at: None,
                state: SessionState::New,
            },
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    // ---------------------------------------------------------------------
    // Connect
    // ---------------------------------------------------------------------

    /// Identifies the device from its secret.
    ///
    /// # Errors
    /// [`GatewayError::Authentication`] on an empty or unknown secret; the
    /// session becomes `Rejected`. [`GatewayError::NotConnected`] if the
    /// session is past `New`.
    pub async fn auth_connect(&mut self, secret: &str) -> Result<(), GatewayError> {
        if self.session.state != SessionState::New {
            return Err(GatewayError::NotConnected);
        }
        self.session.secret = secret.to_string();
        if secret.is_empty() {
            tracing::debug!(owner = %self.owner, "connect without secret");
            self.session.state = SessionState::Rejected;
            return Err(GatewayError::Authentication(AuthError::MissingCredential));
        }

        match self.services.auth.authenticate(secret).await {
            Ok(client_id) => {
                self.session.client_id = Some(client_id);
                self.session.state = SessionState::Connecting;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(owner = %self.owner, error = %e, "authentication failed");
                self.session.state = SessionState::Rejected;
                Err(GatewayError::Authentication(e))
            }
        }
    }

    /// Completes the connect: the session becomes `Connected` and a
    /// `connect` event is recorded.
    pub async fn connect(&mut self) -> Result<(), GatewayError> {
        let client_id = match (&self.session.state, &self.session.client_id) {
            (SessionState::Connecting, Some(id)) => id.clone(),
            _ => return Err(GatewayError::NotConnected),
        };
        self.session.state = SessionState::Connected;
        self.session.connected_at = Some(Instant::now());
        tracing::info!(%client_id, protocol = %self.session.protocol, "session connected");

        self.services
            .emit(Event::session(
                Operation::Connect,
                client_id,
                self.session.protocol,
                &self.services.settings.instance,
            ))
            .await;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Publish
    // ---------------------------------------------------------------------

    /// Parses `topic` and checks the publish policy.
    pub async fn auth_publish(&self, topic: &str) -> Result<Authorized, GatewayError> {
        let client_id = self.connected_client()?;
        let channel = topic::parse(topic).map_err(|e| {
            tracing::debug!(%client_id, topic, error = %e, "unroutable publish topic");
            GatewayError::bad_topic(e)
        })?;
        self.services
            .authorize(client_id, channel, Action::Publish)
            .await
    }

    /// Hands the payload to the bus. No retry on failure.
    pub async fn publish(
        &self,
        authorized: Authorized,
        payload: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let client_id = self.connected_client()?;
        check_action(client_id, &authorized, Action::Publish)?;
        let subject = topic::subject(&self.services.settings.subject_prefix, &authorized.channel);
        let message = Message::new(
            &authorized.channel,
            client_id.clone(),
            self.session.protocol,
            payload,
        );

        self.services
            .publisher
            .publish(&subject, message)
            .await
            .map_err(|e| {
                tracing::warn!(%client_id, subject, error = %e, "bus publish failed");
                GatewayError::Forwarding(e)
            })?;
        tracing::debug!(%client_id, subject, "published");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Subscribe / Unsubscribe
    // ---------------------------------------------------------------------

    /// Parses every filter and checks the subscribe policy. All or
    /// nothing: one refused filter refuses the whole request.
    pub async fn auth_subscribe(
        &self,
        topics: &[String],
    ) -> Result<Vec<Authorized>, GatewayError> {
        self.authorize_filters(topics, Action::Subscribe).await
    }

    /// Registers the filters with the local broker and records one
    /// `subscribe` event per filter.
    ///
    /// All or nothing: a grant for another action refuses the whole
    /// request, and the filters are registered in one step.
    pub async fn subscribe(
        &self,
        grants: Vec<Authorized>,
        sender: NotificationSender,
    ) -> Result<Vec<String>, GatewayError> {
        let client_id = self.connected_client()?;
        for grant in &grants {
            check_action(client_id, grant, Action::Subscribe)?;
        }
        let entries: Vec<(String, String)> = grants
            .iter()
            .map(|grant| {
                let filter = topic::edge_filter(&grant.channel);
                (filter.clone(), filter)
            })
            .collect();
        self.services
            .broker
            .register_all(&self.owner, &entries, &sender)?;

        let mut granted = Vec::with_capacity(grants.len());
        for (grant, (filter, _)) in grants.iter().zip(entries) {
            tracing::debug!(%client_id, filter, "subscribed");

            self.services
                .emit(Event::channel(
                    Operation::Subscribe,
                    client_id.clone(),
                    &grant.channel,
                    self.session.protocol,
                    &self.services.settings.instance,
                ))
                .await;
            granted.push(filter);
        }
        Ok(granted)
    }

    /// Parses every filter and checks the unsubscribe policy.
    pub async fn auth_unsubscribe(
        &self,
        topics: &[String],
    ) -> Result<Vec<Authorized>, GatewayError> {
        self.authorize_filters(topics, Action::Unsubscribe).await
    }

    /// Removes the filters from the local broker and records one
    /// `unsubscribe` event per filter that was registered. Every filter is
    /// acknowledged.
    pub async fn unsubscribe(&self, grants: Vec<Authorized>) -> Result<Vec<String>, GatewayError> {
        let client_id = self.connected_client()?;
        for grant in &grants {
            check_action(client_id, grant, Action::Unsubscribe)?;
        }
        let mut acked = Vec::with_capacity(grants.len());
        for grant in grants {
            let filter = topic::edge_filter(&grant.channel);
            let removed = self.services.broker.deregister(&self.owner, &filter)?;
            tracing::debug!(%client_id, filter, removed, "unsubscribed");
            acked.push(filter);
            if !removed {
                continue;
            }

            self.services
                .emit(Event::channel(
                    Operation::Unsubscribe,
                    client_id.clone(),
                    &grant.channel,
                    self.session.protocol,
                    &self.services.settings.instance,
                ))
                .await;
        }
        Ok(acked)
    }

    // ---------------------------------------------------------------------
    // Disconnect
    // ---------------------------------------------------------------------

    /// Ends the session. Idempotent; records a `disconnect` event only for
    /// a session that reached `Connected`.
    pub async fn disconnect(&mut self) {
        match self.session.state {
            SessionState::Disconnected | SessionState::Rejected => return,
            SessionState::New | SessionState::Connecting => {
                self.session.state = SessionState::Disconnected;
                return;
            }
            SessionState::Connected => {}
        }
        self.session.state = SessionState::Disconnected;

        let removed = self.services.broker.deregister_owner(&self.owner);
        let Some(client_id) = self.session.client_id.clone() else {
            return;
        };
        tracing::info!(%client_id, subscriptions = removed, "session disconnected");

        self.services
            .emit(Event::session(
                Operation::Disconnect,
                client_id,
                self.session.protocol,
                &self.services.settings.instance,
            ))
            .await;
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn connected_client(&self) -> Result<&ClientId, GatewayError> {
        match (&self.session.state, &self.session.client_id) {
            (SessionState::Connected, Some(id)) => Ok(id),
            _ => Err(GatewayError::NotConnected),
        }
    }

    async fn authorize_filters(
        &self,
        topics: &[String],
        action: Action,
    ) -> Result<Vec<Authorized>, GatewayError> {
        let client_id = self.connected_client()?;
        let mut grants = Vec::with_capacity(topics.len());
        for raw in topics {
            let channel = topic::parse_filter(raw).map_err(|e| {
                tracing::debug!(%client_id, topic = %raw, error = %e, "unroutable filter");
                GatewayError::bad_topic(e)
            })?;
            grants.push(self.services.authorize(client_id, channel, action).await?);
        }
        Ok(grants)
    }
}

/// Refuses a grant that was issued for a different action.
fn check_action(
    client_id: &ClientId,
    grant: &Authorized,
    expected: Action,
) -> Result<(), GatewayError> {
    if grant.action == expected {
        return Ok(());
    }
    tracing::warn!(%client_id, channel = %grant.channel, granted = %grant.action, %expected, "grant used for wrong action");
    Err(GatewayError::denied(AuthError::Denied {
        client_id: client_id.clone(),
        channel: grant.channel.id.clone(),
        action: expected,
    }))
}

// =========================================================================
// Tests
// =========================================================================

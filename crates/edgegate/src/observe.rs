//! The observe service: CoAP-style observers on channel traffic.
//!
//! An observer is identified by the device `key` it authenticated with
//! and a `token` chosen by the device, so one device can hold several
//! observations on the same channel. Forwarded messages matching the
//! observed channel and subtopic are pushed to the observer's sender.

use std::future::Future;
use std::sync::Arc;

use edgegate_auth::{Action, Authenticator, Authorizer};
use edgegate_bus::{NotificationSender, Publisher};
use edgegate_protocol::{topic, Channel, ClientId, Event, Operation, Protocol};

use crate::events::EventStore;
use crate::handler::Services;
use crate::GatewayError;

/// Broker owner key for a device's observers. The prefix keeps it apart
/// from session owners (`session:...`).
pub(crate) fn observer_owner(client_id: &ClientId) -> String {
    format!("coap:{client_id}")
}

/// One observation: a device-chosen token and where to deliver.
#[derive(Debug, Clone)]
pub struct Observer {
    pub token: String,
    pub sender: NotificationSender,
}

impl Observer {
    pub fn new(token: impl Into<String>, sender: NotificationSender) -> Self {
        Self {
            token: token.into(),
            sender,
        }
    }
}

/// Observe/cancel operations on channel traffic.
pub trait ObserveService: Send + Sync + 'static {
    /// Starts delivering messages on `channel`/`subtopic` to `observer`.
    fn subscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        observer: Observer,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Cancels the observation registered under `token`, provided it
    /// observes exactly `channel`/`subtopic`. Cancelling an unknown
    /// observation succeeds and records nothing.
    fn unsubscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        token: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

impl<T: ObserveService> ObserveService for Arc<T> {
    fn subscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        observer: Observer,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send {
        (**self).subscribe(key, channel, subtopic, observer)
    }

    fn unsubscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        token: &str,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send {
        (**self).unsubscribe(key, channel, subtopic, token)
    }
}

/// [`ObserveService`] over the shared gateway services.
pub struct ObserveAdapter<A, Z, P, E> {
    services: Arc<Services<A, Z, P, E>>,
}

impl<A, Z, P, E> ObserveAdapter<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    pub fn new(services: Arc<Services<A, Z, P, E>>) -> Self {
        Self { services }
    }

    /// Authenticates `key`, then parses and authorizes the observed
    /// channel. Returns the observer's owner id and edge filter.
    async fn authorize(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        action: Action,
    ) -> Result<(ClientId, Channel, String), GatewayError> {
        let client_id = self.services.auth.authenticate(key).await?;

        let raw = if subtopic.is_empty() {
            format!("channels/{channel}/messages")
        } else {
            format!("channels/{channel}/messages/{}", subtopic.trim_start_matches('/'))
        };
        let parsed = topic::parse_filter(&raw).map_err(|e| {
            tracing::debug!(%client_id, topic = %raw, error = %e, "unroutable observe target");
            GatewayError::bad_topic(e)
        })?;
        let grant = self.services.authorize(&client_id, parsed, action).await?;
        let filter = topic::edge_filter(grant.channel());
        Ok((client_id, grant.channel().clone(), filter))
    }
}

impl<A, Z, P, E> ObserveService for ObserveAdapter<A, Z, P, E>
where
    A: Authenticator,
    Z: Authorizer,
    P: Publisher,
    E: EventStore,
{
    async fn subscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        observer: Observer,
    ) -> Result<(), GatewayError> {
        let (client_id, channel, filter) =
            self.authorize(key, channel, subtopic, Action::Subscribe).await?;

        self.services.broker.register(
            &observer_owner(&client_id),
            &observer.token,
            &filter,
            observer.sender,
        )?;
        tracing::debug!(%client_id, token = %observer.token, filter, "observer registered");

        self.services
            .emit(Event::channel(
                Operation::Subscribe,
                client_id,
                &channel,
                Protocol::Coap,
                &self.services.settings.instance,
            ))
            .await;
        Ok(())
    }

    async fn unsubscribe(
        &self,
        key: &str,
        channel: &str,
        subtopic: &str,
        token: &str,
    ) -> Result<(), GatewayError> {
        let (client_id, channel, filter) =
            self.authorize(key, channel, subtopic, Action::Unsubscribe).await?;

        let removed = self.services.broker.deregister_filter(
            &observer_owner(&client_id),
            token,
            &filter,
        )?;
        if !removed {
            tracing::debug!(%client_id, token, filter, "no matching observer");
            return Ok(());
        }
        tracing::debug!(%client_id, token, filter, "observer removed");

        self.services
            .emit(Event::channel(
                Operation::Unsubscribe,
                client_id,
                &channel,
                Protocol::Coap,
                &self.services.settings.instance,
            ))
            .await;
        Ok(())
    }
}

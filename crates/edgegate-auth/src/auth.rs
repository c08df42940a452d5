//! Capabilities consumed by the gateway to decide who a device is and what
//! it may do.
//!
//! The gateway never owns identities or policies. It talks to them
//! through three narrow traits:
//!
//! - [`IdentityStore`] resolves a secret to a [`ClientId`] (the slow,
//!   authoritative lookup);
//! - [`Authenticator`] is what the session handler calls; the
//!   [`AuthCache`](crate::AuthCache) implements it on top of an
//!   `IdentityStore`;
//! - [`Authorizer`] checks a `(client, channel, action)` triple.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use edgegate_protocol::{ChannelId, ClientId};

use crate::AuthError;

/// The operation a device asks to perform on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Publish,
    Subscribe,
    Unsubscribe,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }

    /// Parses the lowercase action name used in policy tables.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "publish" => Some(Self::Publish),
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves a device secret to its identity.
///
/// Implementations must be safe for unbounded concurrent callers.
///
/// # Example
///
/// ```rust
/// use edgegate_auth::{AuthError, Authenticator};
/// use edgegate_protocol::ClientId;
///
/// /// Treats the secret itself as the identity. Development only.
/// struct EchoAuthenticator;
///
/// impl Authenticator for EchoAuthenticator {
///     async fn authenticate(&self, secret: &str) -> Result<ClientId, AuthError> {
///         if secret.is_empty() {
///             return Err(AuthError::MissingCredential);
///         }
///         Ok(ClientId::new(secret))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the identity bound to `secret`.
    ///
    /// # Errors
    /// Any error means the caller must refuse the connection.
    fn authenticate(
        &self,
        secret: &str,
    ) -> impl Future<Output = Result<ClientId, AuthError>> + Send;
}

/// The authoritative identity service (the "things" store).
pub trait IdentityStore: Send + Sync + 'static {
    /// Looks up the identity for `secret`.
    ///
    /// Returns [`AuthError::NotFound`] for an unknown secret and
    /// [`AuthError::StoreUnavailable`] when the store cannot answer.
    fn identify(
        &self,
        secret: &str,
    ) -> impl Future<Output = Result<ClientId, AuthError>> + Send;
}

/// The policy service.
pub trait Authorizer: Send + Sync + 'static {
    /// Succeeds only if `client_id` may perform `action` on `channel`.
    fn authorize(
        &self,
        client_id: &ClientId,
        channel: &ChannelId,
        action: Action,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;
}

impl<T: Authenticator> Authenticator for Arc<T> {
    fn authenticate(
        &self,
        secret: &str,
    ) -> impl Future<Output = Result<ClientId, AuthError>> + Send {
        (**self).authenticate(secret)
    }
}

impl<T: IdentityStore> IdentityStore for Arc<T> {
    fn identify(
        &self,
        secret: &str,
    ) -> impl Future<Output = Result<ClientId, AuthError>> + Send {
        (**self).identify(secret)
    }
}

impl<T: Authorizer> Authorizer for Arc<T> {
    fn authorize(
        &self,
        client_id: &ClientId,
        channel: &ChannelId,
        action: Action,
    ) -> impl Future<Output = Result<(), AuthError>> + Send {
        (**self).authorize(client_id, channel, action)
    }
}

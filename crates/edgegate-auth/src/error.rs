//! Error types for the authentication layer.

use edgegate_protocol::{ChannelId, ClientId};

use crate::Action;

/// Errors raised while identifying a device or authorizing an operation.
///
/// Callers treat every variant as a refusal: an identity that cannot be
/// resolved, or a policy that cannot be consulted, never lets an
/// operation through.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The device presented an empty secret.
    #[error("missing credential")]
    MissingCredential,

    /// No identity matches the secret, or the identity store could not
    /// be reached.
    #[error("identity not found")]
    NotFound,

    /// The identity store failed for a reason other than a missing
    /// identity.
    #[error("identity store unavailable: {0}")]
    StoreUnavailable(String),

    /// The policy refused the `(client, channel, action)` triple.
    #[error("{client_id} may not {action} on channel {channel}")]
    Denied {
        client_id: ClientId,
        channel: ChannelId,
        action: Action,
    },

    /// The policy service could not be consulted.
    #[error("policy unavailable: {0}")]
    PolicyUnavailable(String),
}

/// Errors from a [`KeyValueCache`](crate::KeyValueCache) backend.
///
/// Always transient from the caller's point of view: a failed read is a
/// miss and a failed write is logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

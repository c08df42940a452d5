//! Unified error type for the gateway.

use edgegate_auth::AuthError;
use edgegate_bus::BusError;
use edgegate_protocol::ProtocolError;
use edgegate_transport::TransportError;

/// Why an operation on a channel was refused.
///
/// A topic that does not resolve to a channel and a policy that says no
/// are reported the same way to the device.
#[derive(Debug, thiserror::Error)]
pub enum Denial {
    #[error(transparent)]
    Topic(#[from] ProtocolError),

    #[error(transparent)]
    Policy(#[from] AuthError),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each wrapping variant auto-generates `From`
/// impls, so `?` converts sub-crate errors automatically. The handler
/// builds `Authorization` and `Forwarding` explicitly, since the same
/// underlying error means different things at different hooks.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The device could not be identified. The session is rejected and
    /// no lifecycle event is recorded.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// The operation was refused. The session stays up.
    #[error("authorization failed: {0}")]
    Authorization(#[from] Denial),

    /// The bus refused a message that had already been authorized.
    #[error("forwarding failed: {0}")]
    Forwarding(#[from] BusError),

    /// A hook was called out of order (e.g. publish before connect).
    #[error("session is not connected")]
    NotConnected,

    /// The gateway could not start: bad config, bind failure, bus
    /// subscription failure or an exhausted health check.
    #[error("startup failed: {0}")]
    Startup(String),

    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid packet).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A long-lived task ended when nothing asked it to.
    #[error("terminated unexpectedly: {0}")]
    Shutdown(String),
}

impl GatewayError {
    /// Shorthand for an authorization failure from a bad topic.
    pub(crate) fn bad_topic(err: ProtocolError) -> Self {
        Self::Authorization(Denial::Topic(err))
    }

    /// Shorthand for an authorization failure from the policy.
    pub(crate) fn denied(err: AuthError) -> Self {
        Self::Authorization(Denial::Policy(err))
    }
}

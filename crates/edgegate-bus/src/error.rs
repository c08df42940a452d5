//! Error types for the bus layer.

/// Errors raised by bus publishers, subscribers and the local broker.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus has been closed; no further publishes or subscriptions.
    #[error("bus is closed")]
    Closed,

    /// A subject is empty, has an empty token, or uses a wildcard where
    /// only a concrete subject is allowed.
    #[error("invalid subject {0:?}")]
    InvalidSubject(String),

    /// The bus could not accept the message.
    #[error("publish to {subject} failed: {reason}")]
    PublishFailed { subject: String, reason: String },
}

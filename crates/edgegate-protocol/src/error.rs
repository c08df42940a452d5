/// A value a device sent (topic, packet, identifier) was unusable.
///
/// Networking and authorization failures live in their own crates.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Malformed JSON, a missing field, or an unknown packet `type`.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The topic does not follow `channels/{id}/messages[/{subtopic}]`.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// The channel segment is empty or contains characters outside
    /// `[A-Za-z0-9_-]`.
    #[error("invalid channel identifier: {0:?}")]
    InvalidChannel(String),

    /// A subtopic segment uses wildcard characters where they are not
    /// allowed (publishing, or a wildcard embedded in a longer segment).
    #[error("malformed subtopic: {0}")]
    MalformedSubtopic(String),

    /// The packet is well-formed JSON but not valid at this point of the
    /// exchange (e.g. a `Publish` before `Connect`).
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}

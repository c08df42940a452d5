//! Core types that flow through the gateway.
//!
//! Identity types ([`ClientId`], [`ChannelId`]), the routing key
//! ([`Channel`]), the bus payload ([`Message`]) and the lifecycle record
//! ([`Event`]). Everything here is serializable because messages travel
//! on the internal bus and events are written to an external sink.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The stable identity of a device (a "thing"), resolved from its secret.
///
/// Newtype wrapper so a client id can never be confused with a channel id
/// or a raw secret, even though all three are strings underneath.
/// `#[serde(transparent)]` keeps the JSON form a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an identity returned by the identity store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque channel identifier.
///
/// Unlike [`ClientId`], a `ChannelId` can only be built through
/// [`ChannelId::parse`], which enforces the platform identifier shape:
/// one or more ASCII letters, digits, `_` or `-`. That keeps bus subjects
/// well-formed, since a channel id never contains `.`, `*` or `>`.
///
/// Deserialization goes through the same check (`try_from = "String"`),
/// so a `ChannelId` read back from the bus is as trustworthy as one
/// parsed from a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Validates and wraps a channel identifier.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidChannel`] if `raw` is empty or
    /// contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let valid = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(ProtocolError::InvalidChannel(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// The edge protocol a session or message came in on.
///
/// `#[serde(rename_all = "lowercase")]` gives `"mqtt"`, `"ws"`, `"coap"`
/// on the wire, which is also the form used for bus subject prefixes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// MQTT over plain TCP.
    #[default]
    Mqtt,
    /// MQTT over WebSocket.
    Ws,
    /// CoAP with the observe extension.
    Coap,
}

impl Protocol {
    /// The lowercase name used in events, metrics labels and subjects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::Ws => "ws",
            Self::Coap => "coap",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A routing key derived from a topic: which channel, and where under it.
///
/// `subtopic` is already normalized to bus syntax (`.`-separated, no empty
/// segments). An empty subtopic means "the channel root".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// The channel the operation targets.
    pub id: ChannelId,
    /// Normalized subtopic, `""` when absent.
    #[serde(default)]
    pub subtopic: String,
}

impl Channel {
    /// A channel with no subtopic.
    pub fn root(id: ChannelId) -> Self {
        Self {
            id,
            subtopic: String::new(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subtopic.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{}.{}", self.id, self.subtopic)
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A device payload on its way to (or from) the internal bus.
///
/// Constructed once per publish and handed to the bus publisher; the
/// gateway never keeps it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Destination channel.
    pub channel: ChannelId,
    /// Normalized subtopic, `""` when absent.
    #[serde(default)]
    pub subtopic: String,
    /// The client that published the message.
    pub publisher: ClientId,
    /// The protocol the message arrived on.
    pub protocol: Protocol,
    /// Opaque payload bytes, never inspected by the gateway.
    pub payload: Vec<u8>,
    /// Creation time in nanoseconds since the Unix epoch.
    pub created: u64,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn new(
        channel: &Channel,
        publisher: ClientId,
        protocol: Protocol,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            channel: channel.id.clone(),
            subtopic: channel.subtopic.clone(),
            publisher,
            protocol,
            payload,
            created: unix_nanos(),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Which lifecycle step an [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presence record consumed by external presence-tracking services.
///
/// Append-only: once handed to an event store, the gateway forgets it.
/// `channel` and `subtopic` are only set for subscribe/unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub operation: Operation,
    pub client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtopic: Option<String>,
    pub protocol: Protocol,
    /// The adapter instance that emitted the event.
    pub instance: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Event {
    /// A connect/disconnect event (no channel).
    pub fn session(
        operation: Operation,
        client_id: ClientId,
        protocol: Protocol,
        instance: &str,
    ) -> Self {
        Self {
            operation,
            client_id,
            channel: None,
            subtopic: None,
            protocol,
            instance: instance.to_string(),
            timestamp: unix_millis(),
        }
    }

    /// A subscribe/unsubscribe event scoped to a channel.
    pub fn channel(
        operation: Operation,
        client_id: ClientId,
        channel: &Channel,
        protocol: Protocol,
        instance: &str,
    ) -> Self {
        let subtopic = if channel.subtopic.is_empty() {
            None
        } else {
            Some(channel.subtopic.clone())
        };
        Self {
            operation,
            client_id,
            channel: Some(channel.id.clone()),
            subtopic,
            protocol,
            instance: instance.to_string(),
            timestamp: unix_millis(),
        }
    }
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Milliseconds since the Unix epoch (0 if the clock is before 1970).
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Nanoseconds since the Unix epoch (0 if the clock is before 1970).
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_parse_accepts_uuid_shapes() {
        assert!(ChannelId::parse("3fae21-uuid").is_ok());
        assert!(
            ChannelId::parse("9b7b1b3f-b1b0-46a8-a717-b8213f9eda3b").is_ok()
        );
        assert!(ChannelId::parse("chan_01").is_ok());
    }

    #[test]
    fn test_channel_id_parse_rejects_bad_characters() {
        for raw in ["", "a.b", "a*", ">", "a/b", "a b", "ché"] {
            assert!(
                matches!(
                    ChannelId::parse(raw),
                    Err(ProtocolError::InvalidChannel(_))
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_channel_id_deserialize_validates() {
        let ok: Result<ChannelId, _> = serde_json::from_str("\"abc-1\"");
        assert!(ok.is_ok());
        let bad: Result<ChannelId, _> = serde_json::from_str("\"a.b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_protocol_serializes_lowercase() {
        let json = serde_json::to_string(&Protocol::Ws).unwrap();
        assert_eq!(json, "\"ws\"");
        assert_eq!(Protocol::Coap.to_string(), "coap");
    }

    #[test]
    fn test_event_session_has_no_channel() {
        let ev = Event::session(
            Operation::Connect,
            ClientId::new("thing-1"),
            Protocol::Mqtt,
            "node-a",
        );
        assert!(ev.channel.is_none());
        assert!(ev.subtopic.is_none());
        assert_eq!(ev.instance, "node-a");

        // Absent fields are omitted from the JSON record.
        let json = serde_json::to_value(&ev).unwrap();
        assert!(json.get("channel").is_none());
        assert_eq!(json["operation"], "connect");
    }

    #[test]
    fn test_event_channel_omits_empty_subtopic() {
        let channel = Channel::root(ChannelId::parse("c1").unwrap());
        let ev = Event::channel(
            Operation::Subscribe,
            ClientId::new("thing-1"),
            &channel,
            Protocol::Mqtt,
            "",
        );
        assert_eq!(ev.channel.as_ref().map(ChannelId::as_str), Some("c1"));
        assert!(ev.subtopic.is_none());
    }

    #[test]
    fn test_message_new_copies_channel_and_subtopic() {
        let channel = Channel {
            id: ChannelId::parse("c1").unwrap(),
            subtopic: "temp.room".into(),
        };
        let msg = Message::new(
            &channel,
            ClientId::new("thing-1"),
            Protocol::Mqtt,
            b"{\"v\":21.5}".to_vec(),
        );
        assert_eq!(msg.channel.as_str(), "c1");
        assert_eq!(msg.subtopic, "temp.room");
        assert_eq!(msg.payload, b"{\"v\":21.5}");
        assert!(msg.created > 0);
    }
}

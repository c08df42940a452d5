//! The edge packet envelope exchanged with devices.
//!
//! Real MQTT/CoAP framing lives outside the gateway core; the listeners
//! in this workspace speak this compact JSON envelope instead, which maps
//! one-to-one onto the session hooks (`Connect` → connect, `Publish` →
//! publish, ...).
//!
//! `#[serde(tag = "type")]` produces internally tagged JSON:
//! `{ "type": "Publish", "topic": "channels/c1/messages", "payload": [1,2] }`.

use serde::{Deserialize, Serialize};

/// Error codes carried by [`Packet::Error`].
pub mod codes {
    /// The packet could not be decoded or arrived out of order.
    pub const BAD_PACKET: u16 = 400;
    /// Authentication failed; the connection will be closed.
    pub const UNAUTHORIZED: u16 = 401;
    /// The operation was denied (bad topic or policy).
    pub const FORBIDDEN: u16 = 403;
    /// The message could not be handed to the bus.
    pub const UNAVAILABLE: u16 = 503;
}

/// A single packet on an edge connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Packet {
    // -- Device → gateway --

    /// First packet of every session: present the device secret.
    Connect { secret: String },

    /// Publish `payload` to `topic` (at-most-once, no acknowledgement).
    Publish { topic: String, payload: Vec<u8> },

    /// Subscribe to one or more topic filters.
    Subscribe { topics: Vec<String> },

    /// Remove previously granted subscriptions.
    Unsubscribe { topics: Vec<String> },

    /// Keep-alive.
    Ping,

    /// Graceful close.
    Disconnect,

    // -- Gateway → device --

    /// The session is authenticated.
    ConnAck,

    /// The filters that were granted, in request order.
    SubAck { topics: Vec<String> },

    /// The filters that were removed.
    UnsubAck { topics: Vec<String> },

    /// Keep-alive answer.
    Pong,

    /// A message forwarded from the bus to a matching subscription.
    Deliver { topic: String, payload: Vec<u8> },

    /// An operation failed. See [`codes`].
    Error { code: u16, message: String },
}

impl Packet {
    /// Shorthand for an [`Packet::Error`].
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_json_is_internally_tagged() {
        let packet = Packet::Connect {
            secret: "abc123".into(),
        };
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "Connect");
        assert_eq!(json["secret"], "abc123");
    }

    #[test]
    fn test_unit_packets_decode_from_type_only() {
        let packet: Packet = serde_json::from_str(r#"{"type":"Ping"}"#).unwrap();
        assert_eq!(packet, Packet::Ping);
    }

    #[test]
    fn test_unknown_packet_type_fails_to_decode() {
        let result: Result<Packet, _> =
            serde_json::from_str(r#"{"type":"Teleport"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_helper() {
        let packet = Packet::error(codes::FORBIDDEN, "denied");
        assert_eq!(
            packet,
            Packet::Error {
                code: 403,
                message: "denied".into()
            }
        );
    }
}

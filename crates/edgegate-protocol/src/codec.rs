//! Byte encoding for everything that crosses a wire: device packets, bus
//! messages and lifecycle event records.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Turns typed values into frames and back. One instance is shared by
/// every connection task.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Fails with [`ProtocolError::Decode`] on malformed input or a shape
    /// that does not match `T`.
    fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, ProtocolError>;
}

/// JSON frames via `serde_json`; the default wire format.
///
/// ```rust
/// use edgegate_protocol::{Codec, JsonCodec, Packet};
///
/// let frame = JsonCodec.encode(&Packet::Ping).unwrap();
/// assert_eq!(frame, br#"{"type":"Ping"}"#);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(frame).map_err(ProtocolError::Decode)
    }
}

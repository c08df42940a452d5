//! Wire types and topic translation for edgegate.
//!
//! This crate defines the values that cross the gateway:
//!
//! - **Types** ([`ClientId`], [`ChannelId`], [`Channel`], [`Message`],
//!   [`Event`]): identities, routing keys, bus payloads and presence
//!   records.
//! - **Topics** ([`topic`]): the pure translator from edge topics to bus
//!   subjects and back.
//! - **Packets** ([`Packet`]): the envelope devices exchange with the
//!   listeners.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, values out.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about connections, credentials or the
//! bus. It only knows how to name things and how to serialize them.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet, Channel) → Gateway (auth, bus)
//! ```

mod codec;
mod error;
mod packet;
pub mod topic;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use packet::{codes, Packet};
pub use types::{
    unix_millis, unix_nanos, Channel, ChannelId, ClientId, Event, Message,
    Operation, Protocol,
};

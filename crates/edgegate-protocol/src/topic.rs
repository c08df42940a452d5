//! Topic translation: edge topics in, bus subjects out.
//!
//! Devices address channels with slash-separated topics:
//!
//! ```text
//! channels/{channel}/messages[/{subtopic...}][?{query}]
//! ```
//!
//! The internal bus uses dot-separated subjects:
//!
//! ```text
//! {prefix}.{channel}[.{subtopic...}]
//! ```
//!
//! [`parse`] handles topics a device publishes to (no wildcards),
//! [`parse_filter`] handles topics a device subscribes to (MQTT `+`/`#`
//! become bus `*`/`>`). Both are pure and never partially succeed: a
//! topic either yields a [`Channel`] or an error, and callers treat the
//! error exactly like an authorization denial.

use crate::{Channel, ChannelId, ProtocolError};

const CHANNELS: &str = "channels";
const MESSAGES: &str = "messages";

/// Separator between subject tokens on the bus.
pub const SUBJECT_SEPARATOR: char = '.';

/// Parses a publish topic into its channel and normalized subtopic.
///
/// # Errors
/// - [`ProtocolError::InvalidTopic`]: the `channels/…/messages` frame is missing
/// - [`ProtocolError::InvalidChannel`]: the channel segment is malformed
/// - [`ProtocolError::MalformedSubtopic`]: the subtopic contains wildcards
///
/// ```rust
/// use edgegate_protocol::topic;
///
/// let channel = topic::parse("channels/3fae21-uuid/messages/temp").unwrap();
/// assert_eq!(channel.id.as_str(), "3fae21-uuid");
/// assert_eq!(channel.subtopic, "temp");
/// ```
pub fn parse(topic: &str) -> Result<Channel, ProtocolError> {
    let (id, raw_subtopic) = split_topic(topic)?;
    let subtopic = normalize(raw_subtopic, false)?;
    Ok(Channel { id, subtopic })
}

/// Parses a subscription filter. Same grammar as [`parse`], but the
/// subtopic may contain single-level (`+`) and multi-level (`#`, last
/// segment only) MQTT wildcards, translated to `*` and `>`.
///
/// # Errors
/// Same as [`parse`]; additionally `#` anywhere but the last segment is
/// a [`ProtocolError::MalformedSubtopic`].
pub fn parse_filter(topic: &str) -> Result<Channel, ProtocolError> {
    let (id, raw_subtopic) = split_topic(topic)?;
    let subtopic = normalize(raw_subtopic, true)?;
    Ok(Channel { id, subtopic })
}

/// Builds the bus subject a message on `channel` is published to.
pub fn subject(prefix: &str, channel: &Channel) -> String {
    if channel.subtopic.is_empty() {
        format!("{prefix}.{}", channel.id)
    } else {
        format!("{prefix}.{}.{}", channel.id, channel.subtopic)
    }
}

/// The wildcard subject matching every channel under `prefix`.
pub fn all_channels(prefix: &str) -> String {
    format!("{prefix}.>")
}

/// Rebuilds the edge topic for a channel and normalized subtopic, the
/// inverse of [`parse`]. Used when bus traffic is pushed back to devices.
pub fn edge_topic(channel: &ChannelId, subtopic: &str) -> String {
    let mut topic = format!("{CHANNELS}/{channel}/{MESSAGES}");
    if !subtopic.is_empty() {
        topic.push('/');
        topic.push_str(&subtopic.replace(SUBJECT_SEPARATOR, "/"));
    }
    topic
}

/// Rebuilds an MQTT filter from a channel parsed with [`parse_filter`]:
/// bus `*`/`>` go back to `+`/`#`. The result is in the same canonical
/// form as [`edge_topic`], so the two can be compared level by level.
pub fn edge_filter(channel: &Channel) -> String {
    let mut filter = format!("{CHANNELS}/{}/{MESSAGES}", channel.id);
    for token in channel.subtopic.split(SUBJECT_SEPARATOR).filter(|t| !t.is_empty()) {
        filter.push('/');
        filter.push_str(match token {
            "*" => "+",
            ">" => "#",
            t => t,
        });
    }
    filter
}

/// Splits `topic` into the validated channel id and the raw remainder
/// after `messages/` (empty when absent).
fn split_topic(topic: &str) -> Result<(ChannelId, &str), ProtocolError> {
    let invalid = || ProtocolError::InvalidTopic(topic.to_string());

    // A trailing query string (`?ct=json`) carries content hints, not routing.
    let path = topic.split_once('?').map_or(topic, |(path, _)| path);
    let path = path.strip_prefix('/').unwrap_or(path);

    let rest = path
        .strip_prefix(CHANNELS)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(invalid)?;
    let (raw_id, rest) = rest.split_once('/').ok_or_else(invalid)?;
    let id = ChannelId::parse(raw_id)?;

    let raw_subtopic = match rest.strip_prefix(MESSAGES) {
        Some("") => "",
        Some(tail) => tail.strip_prefix('/').ok_or_else(invalid)?,
        None => return Err(invalid()),
    };
    Ok((id, raw_subtopic))
}

/// Converts a raw slash-separated subtopic into bus syntax.
///
/// Empty segments are dropped, so `a//b/` becomes `a.b`. Dots inside a
/// segment split it as well, since the bus would read them as separators.
fn normalize(raw: &str, allow_wildcards: bool) -> Result<String, ProtocolError> {
    let malformed = || ProtocolError::MalformedSubtopic(raw.to_string());

    let segments: Vec<&str> = raw
        .split(['/', SUBJECT_SEPARATOR])
        .filter(|s| !s.is_empty())
        .collect();

    let mut out = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        let token = match *segment {
            "+" | "*" if allow_wildcards => "*",
            "#" | ">" if allow_wildcards && last => ">",
            s if s.contains(['+', '#', '*', '>']) => return Err(malformed()),
            s => s,
        };
        out.push(token);
    }
    Ok(out.join("."))
}

//! Envelope model and JSON codec for the chat WS transport.
//!
//! Every unit on the wire, heartbeat or application, is the same envelope:
//!
//! ```json
//! {"payload": {"message": "<text>"}, "metadata": {"sent": true}}
//! ```
//!
//! The literal messages `"ping"` and `"pong"` are heartbeat control frames;
//! any other string is application traffic. `metadata.sent` marks locally
//! originated messages for display and means nothing to the remote peer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message text of a heartbeat probe.
pub const PING: &str = "ping";

/// Message text of a heartbeat reply.
pub const PONG: &str = "pong";

/// Error returned by [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes are not well-formed UTF-8 JSON.
    #[error("failed to decode JSON envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The JSON parsed but has no string at `payload.message`.
    #[error("envelope is missing `payload.message`")]
    MissingMessage,
}

/// Message body of an [`Envelope`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub message: String,
}

/// Display hints attached to an [`Envelope`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// `true` when the message originated on this side of the connection.
    #[serde(default)]
    pub sent: bool,
}

/// The single wire unit exchanged over the socket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Payload,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Envelope {
    /// Build an envelope carrying `text`.
    pub fn new(text: impl Into<String>, sent: bool) -> Self {
        Self {
            payload: Payload {
                message: text.into(),
            },
            metadata: Metadata { sent },
        }
    }

    /// Heartbeat probe, as emitted by the local side.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(PING, true)
    }

    /// Heartbeat reply, as emitted by the local side.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(PONG, true)
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.payload.message
    }

    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.metadata.sent
    }
}

/// Heartbeat control frame flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Heartbeat {
    Ping,
    Pong,
}

/// Routing class of a decoded envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Consumed by the connection; never forwarded to the application.
    Heartbeat(Heartbeat),
    /// Forwarded to the application as an inbound message.
    Application,
}

/// Wrap `text` in an envelope and serialize it to wire JSON.
#[must_use]
pub fn encode(text: &str, sent: bool) -> String {
    encode_envelope(&Envelope::new(text, sent))
}

/// Serialize an existing envelope to wire JSON.
#[must_use]
pub fn encode_envelope(envelope: &Envelope) -> String {
    // Strings and bools only; serialization cannot fail.
    serde_json::to_string(envelope).unwrap_or_default()
}

/// Parse wire bytes into an envelope.
///
/// A missing or `null` `metadata` (or `metadata.sent`) decodes as
/// `sent = false`. Unknown fields are ignored.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for bytes that are not JSON and
/// [`CodecError::MissingMessage`] when `payload.message` is absent or not a
/// string.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let value = serde_json::from_slice::<Value>(bytes)?;

    let message = value
        .get("payload")
        .and_then(|payload| payload.get("message"))
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingMessage)?;
    let sent = value
        .get("metadata")
        .and_then(|metadata| metadata.get("sent"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(Envelope::new(message, sent))
}

/// Classify an envelope as heartbeat control or application traffic.
#[must_use]
pub fn classify(envelope: &Envelope) -> FrameKind {
    match envelope.message() {
        PING => FrameKind::Heartbeat(Heartbeat::Ping),
        PONG => FrameKind::Heartbeat(Heartbeat::Pong),
        _ => FrameKind::Application,
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;

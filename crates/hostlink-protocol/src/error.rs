//! Error types for the protocol layer.
//!
//! Each crate in Hostlink defines its own error enum. When you see a
//! `ProtocolError`, the problem is in turning messages into bytes or back,
//! not in networking.

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a [`Message`](crate::Message) into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, wrong
    /// field types, or a log entry with a sentinel level.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The JSON object has no `"Type"` string discriminator.
    #[error("message has no \"Type\" discriminator")]
    MissingType,

    /// The `"Type"` discriminator names no known message variant.
    ///
    /// Decoding never falls back to a best-guess variant.
    #[error("unknown message type: {0:?}")]
    UnknownType(String),

    /// The message parsed but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

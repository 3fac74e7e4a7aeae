//! Codec trait and the JSON implementation.
//!
//! A "codec" converts between [`Message`] values and raw bytes. The
//! connection layer only needs something implementing [`Codec`]; it doesn't
//! care how the bytes look.
//!
//! Decoding is discriminator-first: the `"Type"` field is read and checked
//! against [`Message::KNOWN_TYPES`] before the variant-specific fields are
//! parsed, so an unknown tag fails with [`ProtocolError::UnknownType`]
//! instead of a generic parse error.

use serde::Deserialize;

use crate::{Message, ProtocolError};

/// Encodes messages to bytes and decodes bytes back to messages.
///
/// `Send + Sync + 'static` because a codec is shared between the caller's
/// task and every receive task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a message. Total over every [`Message`] variant.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes one message from a complete frame payload.
    ///
    /// Pure: it touches nothing but its input.
    ///
    /// # Errors
    /// - `ProtocolError::MissingType` if there is no `"Type"` string
    /// - `ProtocolError::UnknownType` if the tag names no known variant
    /// - `ProtocolError::Decode` if the bytes are malformed
    fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that writes UTF-8 JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use hostlink_protocol::{Codec, JsonCodec, Message};
///
/// let codec = JsonCodec;
/// let msg = Message::payload(b"ping".to_vec());
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

/// Just the discriminator. Serde skips every other field.
#[derive(Deserialize)]
struct Discriminator {
    #[serde(rename = "Type")]
    kind: Option<String>,
}

impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message).map_err(ProtocolError::Encode)
    }

    fn decode(&self, data: &[u8]) -> Result<Message, ProtocolError> {
        let header: Discriminator =
            serde_json::from_slice(data).map_err(ProtocolError::Decode)?;
        let kind = header.kind.ok_or(ProtocolError::MissingType)?;
        if !Message::KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogEntry, LogLevel};

    #[test]
    fn test_round_trip_every_variant() {
        let codec = JsonCodec;
        let messages = [
            Message::connect("7d1c"),
            Message::disconnect(""),
            Message::payload(Vec::new()),
            Message::payload((0u8..=255).collect::<Vec<_>>()),
            Message::log(LogEntry::now(LogLevel::Warn, "disk almost full").unwrap()),
        ];
        for msg in messages {
            let bytes = codec.encode(&msg).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_decode_accepts_foreign_field_order() {
        let json = br#"{"ClientId":"abc","Type":"ConnectMessage"}"#;
        assert_eq!(JsonCodec.decode(json).unwrap(), Message::connect("abc"));
    }

    #[test]
    fn test_decode_unknown_type_is_protocol_error() {
        let json = br#"{"Type":"FlyToMoonMessage","ClientId":"x"}"#;
        match JsonCodec.decode(json) {
            Err(ProtocolError::UnknownType(kind)) => assert_eq!(kind, "FlyToMoonMessage"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_base_type_name_is_rejected() {
        // The abstract base name is not a concrete variant.
        let json = br#"{"Type":"Message"}"#;
        assert!(matches!(
            JsonCodec.decode(json),
            Err(ProtocolError::UnknownType(_))
        ));
    }

    #[test]
    fn test_decode_missing_type() {
        let json = br#"{"ClientId":"x"}"#;
        assert!(matches!(
            JsonCodec.decode(json),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn test_decode_non_string_type_is_decode_error() {
        let json = br#"{"Type":42}"#;
        assert!(matches!(JsonCodec.decode(json), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_garbage_returns_error() {
        assert!(matches!(
            JsonCodec.decode(b"not json at all"),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_known_type_missing_fields() {
        let json = br#"{"Type":"ConnectMessage"}"#;
        assert!(matches!(JsonCodec.decode(json), Err(ProtocolError::Decode(_))));
    }
}

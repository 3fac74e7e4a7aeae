//! Core protocol types for Hostlink's wire format.
//!
//! Every type in this module travels "on the wire": it is serialized to
//! JSON, framed, sent over TCP, and deserialized on the other side.
//!
//! The JSON shapes are fixed and use PascalCase keys with an explicit
//! `"Type"` discriminator:
//!
//! ```text
//! {"Type":"ConnectMessage","ClientId":"..."}
//! {"Type":"DisconnectMessage","ClientId":"..."}
//! {"Type":"RuntimeHostMessage","Message":"<base64>"}
//! {"Type":"LogMessageMessage","Message":{"Timestamp":"...","Level":"Info","Message":"..."}}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The identifier a server assigns to a client during the handshake.
///
/// A newtype over `String` so it can't be confused with arbitrary text.
/// `#[serde(transparent)]` keeps it a plain JSON string on the wire.
///
/// The empty id is the "not yet assigned" value a client reports when it
/// disconnects before the handshake completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, collision-free identifier (a random v4 UUID).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the unassigned (empty) identifier.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

/// Severity of a log entry, from least to most severe.
///
/// The derived `PartialOrd`/`Ord` follow declaration order, so
/// `LogLevel::Debug < LogLevel::Error` holds. `All` and `None` are filter
/// sentinels: they bracket the real levels and are never valid on an
/// actual [`LogEntry`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    /// Filter sentinel: everything passes.
    All,
    /// Tracing of code execution.
    Debug,
    /// Performance measurements.
    Perf,
    /// Messages that might interest the user.
    Info,
    /// Warnings.
    Warn,
    /// Errors that were handled gracefully.
    Error,
    /// Errors that were not handled gracefully.
    Fail,
    /// Filter sentinel: nothing passes.
    None,
}

impl LogLevel {
    /// Returns the variant name as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Debug => "Debug",
            Self::Perf => "Perf",
            Self::Info => "Info",
            Self::Warn => "Warn",
            Self::Error => "Error",
            Self::Fail => "Fail",
            Self::None => "None",
        }
    }

    /// `true` for `All` and `None`, which only make sense as filters.
    pub fn is_sentinel(self) -> bool {
        matches!(self, Self::All | Self::None)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// A timestamped, leveled log line.
///
/// Construction validates the level, and so does deserialization: serde
/// goes through [`RawLogEntry`] and `TryFrom`, so a remote peer can't
/// smuggle in an entry with a sentinel level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", try_from = "RawLogEntry")]
pub struct LogEntry {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    message: String,
}

impl LogEntry {
    /// Creates a log entry.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] if `level` is `All` or `None`.
    pub fn new(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        if level.is_sentinel() {
            return Err(ProtocolError::InvalidMessage(format!(
                "log level {level} is a filter value, not a message level"
            )));
        }
        Ok(Self {
            timestamp,
            level,
            message: message.into(),
        })
    }

    /// Creates a log entry stamped with the current time.
    pub fn now(level: LogLevel, message: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::new(Utc::now(), level, message)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns a copy of this entry carrying different text.
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..self.clone()
        }
    }

    /// A concise rendering for user-facing output panes: time of day only.
    pub fn to_output_pane_string(&self) -> String {
        format!("[{}]  {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // One fractional digit: tenths of a second.
        let tenths = self.timestamp.timestamp_subsec_millis() / 100;
        write!(
            f,
            "({}.{}): {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            tenths,
            self.level.as_str().to_uppercase(),
            self.message
        )
    }
}

/// Unvalidated wire shape of a [`LogEntry`].
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawLogEntry {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    message: String,
}

impl TryFrom<RawLogEntry> for LogEntry {
    type Error = ProtocolError;

    fn try_from(raw: RawLogEntry) -> Result<Self, Self::Error> {
        LogEntry::new(raw.timestamp, raw.level, raw.message)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Every message that can travel between a client and a server.
///
/// `#[serde(tag = "Type")]` makes this an internally tagged enum: the
/// variant name is written into the object as `"Type": "..."`, next to the
/// variant's own fields. The variant set is closed; the codec rejects any
/// other discriminator before serde gets a chance to guess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum Message {
    /// Server → client handshake: "you are `client_id`".
    #[serde(rename = "ConnectMessage")]
    Connect {
        #[serde(rename = "ClientId")]
        client_id: ClientId,
    },

    /// Either direction: "`client_id` is going away".
    #[serde(rename = "DisconnectMessage")]
    Disconnect {
        #[serde(rename = "ClientId")]
        client_id: ClientId,
    },

    /// Opaque application bytes, base64 encoded on the wire.
    #[serde(rename = "RuntimeHostMessage")]
    Payload {
        #[serde(rename = "Message", with = "base64_bytes")]
        data: Vec<u8>,
    },

    /// A structured log line.
    #[serde(rename = "LogMessageMessage")]
    Log {
        #[serde(rename = "Message")]
        entry: LogEntry,
    },
}

impl Message {
    /// Every discriminator the decoder accepts.
    pub const KNOWN_TYPES: [&'static str; 4] = [
        "ConnectMessage",
        "DisconnectMessage",
        "RuntimeHostMessage",
        "LogMessageMessage",
    ];

    /// The `"Type"` discriminator this message is written with.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "ConnectMessage",
            Self::Disconnect { .. } => "DisconnectMessage",
            Self::Payload { .. } => "RuntimeHostMessage",
            Self::Log { .. } => "LogMessageMessage",
        }
    }

    /// `true` for the handshake/teardown variants.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Disconnect { .. })
    }

    pub fn connect(client_id: impl Into<ClientId>) -> Self {
        Self::Connect {
            client_id: client_id.into(),
        }
    }

    pub fn disconnect(client_id: impl Into<ClientId>) -> Self {
        Self::Disconnect {
            client_id: client_id.into(),
        }
    }

    pub fn payload(data: impl Into<Vec<u8>>) -> Self {
        Self::Payload { data: data.into() }
    }

    pub fn log(entry: LogEntry) -> Self {
        Self::Log { entry }
    }
}

/// Serde adapter writing `Vec<u8>` as a standard base64 string.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

//! Wire protocol for Hostlink.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Types** ([`Message`], [`ClientId`], [`LogEntry`], [`LogLevel`]):
//!   the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those messages are
//!   converted to and from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! # Architecture
//!
//! The protocol layer sits between the framed transport (one byte buffer
//! per frame) and the connection layer (events and handshake state). It
//! knows nothing about sockets.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Connection (events)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{ClientId, LogEntry, LogLevel, Message};

//! # Hostlink
//!
//! Point-to-multipoint typed messaging over raw TCP.
//!
//! A process runs either a [`BridgeServer`], accepting many clients, or a
//! [`BridgeClient`], connected to one server. Both exchange [`Message`]s:
//! JSON objects with a `"Type"` discriminator, each sent as one
//! length-prefixed frame.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Connection (events, handshake)
//! ```
//!
//! This is fire-and-forget messaging with a minimal connect/disconnect
//! handshake: no request/response correlation, no streams, no auth.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hostlink::prelude::*;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), HostlinkError> {
//! let init = InitData::new("127.0.0.1", 8888)?;
//!
//! let server = BridgeServer::new(init.clone());
//! server.connect(None).await;
//!
//! let client = BridgeClient::new(init);
//! client.connect(None).await;
//! let id = client.wait_for_client_id(Duration::from_secs(1)).await;
//! println!("assigned {id:?}");
//!
//! server.send(&Message::payload(b"to everyone".to_vec())).await;
//! client.disconnect().await;
//! server.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![allow(async_fn_in_trait)]

mod client;
mod config;
mod connection;
mod error;
mod event;
mod registry;
mod server;
mod sink;

pub use client::BridgeClient;
pub use config::InitData;
pub use connection::{Communicator, ConnectionState, DataBridge};
pub use error::HostlinkError;
pub use event::{DataReceived, StateChange};
pub use server::{BridgeServer, HANDSHAKE_DELAY};
pub use sink::{LogSink, MemorySink, TracingSink};

pub use hostlink_protocol::{ClientId, Codec, JsonCodec, LogEntry, LogLevel, Message, ProtocolError};
pub use hostlink_transport::TransportError;
pub use tokio_util::sync::CancellationToken;

/// Everything needed to run a client or a server.
pub mod prelude {
    pub use crate::{
        BridgeClient, BridgeServer, CancellationToken, ClientId, Communicator, ConnectionState,
        DataBridge, DataReceived, HostlinkError, InitData, LogEntry, LogLevel, LogSink,
        MemorySink, Message, StateChange, TracingSink,
    };
}

//! Unified error type for Hostlink.

use hostlink_protocol::ProtocolError;
use hostlink_transport::TransportError;

/// Top-level error that wraps the layer-specific errors.
///
/// The `#[from]` attribute on each variant generates `From` impls, so the
/// `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum HostlinkError {
    /// A transport-level error (bind, connect, framing, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, unknown discriminator).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The initialization data was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operation needs an open connection.
    #[error("not connected")]
    NotConnected,
}

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Establishing an outbound TCP connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Binding the listening socket failed (address in use, permission denied).
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Accepting an inbound connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Writing a frame failed on a socket that looked alive.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading from the socket failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The stream closed part-way through a frame.
    #[error("incomplete frame: expected {expected} bytes, got {received}")]
    IncompleteFrame { expected: usize, received: usize },

    /// The length prefix exceeds [`MAX_FRAME_SIZE`](crate::MAX_FRAME_SIZE).
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The length prefix is zero. No message encodes to nothing.
    #[error("empty frame")]
    EmptyFrame,

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

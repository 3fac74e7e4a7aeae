//! Machinery shared by both roles: lifecycle state, event fan-out, the
//! payload queue and the per-connection receive loop.
//!
//! ```text
//!   Idle ──connect()──→ Connecting ──socket up──→ Open
//!                                                   │
//!                          disconnect() / fatal I/O │
//!                                                   ▼
//!                           Closed ←──released── Closing
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use hostlink_protocol::{ClientId, Codec, JsonCodec, LogLevel, Message};
use hostlink_transport::{Connection, TcpConnection};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{DataReceived, HostlinkError, LogSink, StateChange};

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Unread payloads kept for [`DataBridge::read_message`]. Further payloads
/// are still published as events but not queued.
pub(crate) const PAYLOAD_QUEUE_CAPACITY: usize = EVENT_CAPACITY;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never connected.
    Idle,
    /// Dialing or binding.
    Connecting,
    /// Socket established, receive loop running.
    Open,
    /// Tearing down: cancelling the receive loop, releasing the socket.
    Closing,
    /// Socket released, no receive loop left.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Public traits
// ---------------------------------------------------------------------------

/// One end of a Hostlink conversation: a [`BridgeClient`](crate::BridgeClient)
/// or a [`BridgeServer`](crate::BridgeServer).
///
/// Failures never cross this boundary as errors. `connect` and `send`
/// report `false` and log the details to the role's [`LogSink`].
pub trait Communicator: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// `true` while the connection (or listener) is open.
    fn is_running(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Dials (client) or binds (server) and starts the background tasks.
    ///
    /// Cancelling `cancel` later stops those tasks and closes the role.
    async fn connect(&self, cancel: Option<CancellationToken>) -> bool;

    /// Sends `message` to the peer (client) or every registered client
    /// (server). No retries.
    async fn send(&self, message: &Message) -> bool;

    /// Tears down. Calling it again, or before `connect`, does nothing.
    async fn disconnect(&self);

    /// Subscribes to decoded non-control messages.
    fn subscribe_data(&self) -> broadcast::Receiver<DataReceived>;

    /// Subscribes to handshake and teardown transitions.
    fn subscribe_state(&self) -> broadcast::Receiver<StateChange>;
}

/// Byte-oriented view of a [`Communicator`]: raw payloads in, raw
/// payloads out, carried as `Message::Payload` on the wire.
pub trait DataBridge {
    /// Waits for the next received payload, in arrival order.
    ///
    /// Returns `None` once the endpoint is closed and every queued payload
    /// has been read.
    async fn read_message(&self) -> Option<Vec<u8>>;

    /// Sends `bytes` as a payload message.
    async fn write_message(&self, bytes: Vec<u8>) -> bool;

    /// Disconnects.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// State shared between a role and its background tasks.
pub(crate) struct Endpoint {
    pub(crate) codec: JsonCodec,
    sink: Arc<dyn LogSink>,
    state: watch::Sender<ConnectionState>,
    data_tx: broadcast::Sender<DataReceived>,
    state_tx: broadcast::Sender<StateChange>,
    payload_tx: mpsc::Sender<Vec<u8>>,
    payload_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    /// Set once the queue overflowed; cleared when a reader catches up.
    payload_overflow: AtomicBool,
}

impl Endpoint {
    pub(crate) fn new(sink: Arc<dyn LogSink>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (data_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (payload_tx, payload_rx) = mpsc::channel(PAYLOAD_QUEUE_CAPACITY);
        Self {
            codec: JsonCodec,
            sink,
            state,
            data_tx,
            state_tx,
            payload_tx,
            payload_rx: Mutex::new(payload_rx),
            payload_overflow: AtomicBool::new(false),
        }
    }

    pub(crate) fn log(&self, level: LogLevel, text: &str) {
        self.sink.log(level, text);
    }

    pub(crate) fn log_elapsed(&self, what: &str, started: Instant) {
        self.sink.log_elapsed(what, started);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            self.log(LogLevel::Debug, &format!("State {prev} -> {next}"));
        }
    }

    pub(crate) fn subscribe_data(&self) -> broadcast::Receiver<DataReceived> {
        self.data_tx.subscribe()
    }

    pub(crate) fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    /// Raises a state event. Having no subscribers is fine.
    pub(crate) fn publish_state(&self, change: StateChange) {
        let _ = self.state_tx.send(change);
    }

    /// Raises a data event, queueing payload bytes for [`DataBridge`] readers.
    ///
    /// A full queue drops the bytes (the event still goes out) and warns
    /// once until a reader drains it again.
    pub(crate) fn publish_data(&self, peer: Option<ClientId>, message: Message) {
        if let Message::Payload { data } = &message {
            if let Err(mpsc::error::TrySendError::Full(_)) = self.payload_tx.try_send(data.clone())
            {
                if !self.payload_overflow.swap(true, Ordering::Relaxed) {
                    self.log(
                        LogLevel::Warn,
                        &format!(
                            "Payload queue full ({PAYLOAD_QUEUE_CAPACITY}); dropping payloads until read_message catches up"
                        ),
                    );
                }
            }
        }
        let _ = self.data_tx.send(DataReceived { peer, message });
    }

    /// Discards payloads nobody read during the previous session.
    pub(crate) async fn reset_payloads(&self) {
        let mut payloads = self.payload_rx.lock().await;
        let mut discarded = 0usize;
        while payloads.try_recv().is_ok() {
            discarded += 1;
        }
        self.payload_overflow.store(false, Ordering::Relaxed);
        if discarded > 0 {
            self.log(
                LogLevel::Debug,
                &format!("Discarded {discarded} unread payloads from the previous session"),
            );
        }
    }

    /// Encodes `message` and writes it as one frame on `conn`.
    pub(crate) async fn send_on(
        &self,
        conn: &TcpConnection,
        message: &Message,
    ) -> Result<(), HostlinkError> {
        let bytes = self.codec.encode(message)?;
        conn.send(&bytes).await?;
        Ok(())
    }

    pub(crate) async fn next_payload(&self) -> Option<Vec<u8>> {
        let mut payloads = self.payload_rx.lock().await;
        let mut state = self.state.subscribe();
        loop {
            if let Ok(data) = payloads.try_recv() {
                self.payload_overflow.store(false, Ordering::Relaxed);
                return Some(data);
            }
            let current = *state.borrow_and_update();
            if !matches!(current, ConnectionState::Connecting | ConnectionState::Open) {
                return None;
            }
            tokio::select! {
                data = payloads.recv() => return data,
                changed = state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

/// What the loop should do after a message was handled.
pub(crate) enum Dispatch {
    Continue,
    /// The peer announced teardown.
    Stop,
}

/// Why a receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    Cancelled,
    PeerDisconnected,
    /// The peer closed the stream on a frame boundary.
    Closed,
    /// Read, framing or decode failure. Already logged.
    Failed,
}

/// Reads frames from `conn` until cancelled, closed, or broken, handing
/// each decoded message to `on_message` in arrival order.
///
/// The read is the only suspension point. Once `token` fires, no further
/// message is handed out.
pub(crate) async fn receive_loop<F>(
    conn: &TcpConnection,
    token: &CancellationToken,
    endpoint: &Endpoint,
    peer: &str,
    mut on_message: F,
) -> LoopExit
where
    F: FnMut(Message) -> Dispatch,
{
    endpoint.log(LogLevel::Debug, &format!("Start receiving updates from {peer}"));
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return LoopExit::Cancelled,
            frame = conn.recv() => frame,
        };

        let bytes = match frame {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                endpoint.log(LogLevel::Debug, &format!("{peer} closed the connection"));
                return LoopExit::Closed;
            }
            Err(e) => {
                endpoint.log(LogLevel::Error, &format!("Receive from {peer} failed: {e}"));
                return LoopExit::Failed;
            }
        };

        let message = match endpoint.codec.decode(&bytes) {
            Ok(message) => message,
            Err(e) => {
                // Framing can't resynchronize after a bad frame.
                endpoint.log(
                    LogLevel::Error,
                    &format!("Failed to decode message from {peer}: {e}"),
                );
                return LoopExit::Failed;
            }
        };

        if token.is_cancelled() {
            return LoopExit::Cancelled;
        }
        if let Dispatch::Stop = on_message(message) {
            return LoopExit::PeerDisconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySink;

    fn endpoint() -> (Endpoint, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Endpoint::new(sink.clone()), sink)
    }

    #[test]
    fn test_new_endpoint_is_idle() {
        let (endpoint, _) = endpoint();
        assert_eq!(endpoint.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_state_transitions_are_logged() {
        let (endpoint, sink) = endpoint();
        endpoint.set_state(ConnectionState::Connecting);
        endpoint.set_state(ConnectionState::Connecting);
        assert_eq!(endpoint.state(), ConnectionState::Connecting);
        assert_eq!(sink.entries().len(), 1);
        assert!(sink.contains("idle -> connecting"));
    }

    #[test]
    fn test_publish_data_reaches_subscribers() {
        let (endpoint, _) = endpoint();
        let mut rx = endpoint.subscribe_data();
        endpoint.publish_data(None, Message::payload(vec![1, 2]));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.message, Message::payload(vec![1, 2]));
        assert_eq!(event.peer, None);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let (endpoint, _) = endpoint();
        endpoint.publish_state(StateChange::connected(ClientId::new("a")));
        endpoint.publish_data(None, Message::disconnect("a"));
    }

    #[tokio::test]
    async fn test_next_payload_drains_queue_then_ends_when_closed() {
        let (endpoint, _) = endpoint();
        endpoint.set_state(ConnectionState::Open);
        endpoint.publish_data(None, Message::payload(b"a".to_vec()));
        endpoint.publish_data(None, Message::payload(b"b".to_vec()));
        endpoint.set_state(ConnectionState::Closed);

        assert_eq!(endpoint.next_payload().await, Some(b"a".to_vec()));
        assert_eq!(endpoint.next_payload().await, Some(b"b".to_vec()));
        assert_eq!(endpoint.next_payload().await, None);
    }

    #[tokio::test]
    async fn test_next_payload_wakes_on_close() {
        let endpoint = Arc::new(endpoint().0);
        endpoint.set_state(ConnectionState::Open);

        let reader = {
            let endpoint = Arc::clone(&endpoint);
            tokio::spawn(async move { endpoint.next_payload().await })
        };
        tokio::task::yield_now().await;
        endpoint.set_state(ConnectionState::Closed);

        assert_eq!(reader.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unread_payloads_are_bounded() {
        let (endpoint, sink) = endpoint();
        let mut events = endpoint.subscribe_data();
        endpoint.set_state(ConnectionState::Open);

        for i in 0..PAYLOAD_QUEUE_CAPACITY * 4 {
            endpoint.publish_data(None, Message::payload(vec![0u8; 1024]));
            if i % 64 == 0 {
                // Event-only consumer keeps up; nobody calls next_payload.
                while events.try_recv().is_ok() {}
            }
        }
        endpoint.set_state(ConnectionState::Closed);

        let mut retained = 0;
        while endpoint.next_payload().await.is_some() {
            retained += 1;
        }
        assert_eq!(retained, PAYLOAD_QUEUE_CAPACITY);

        let warnings = sink
            .entries()
            .iter()
            .filter(|e| e.message().starts_with("Payload queue full"))
            .count();
        assert_eq!(warnings, 1);
    }

    #[tokio::test]
    async fn test_reset_payloads_drops_previous_session() {
        let (endpoint, sink) = endpoint();
        endpoint.set_state(ConnectionState::Open);
        endpoint.publish_data(None, Message::payload(b"stale".to_vec()));
        endpoint.set_state(ConnectionState::Closed);

        endpoint.reset_payloads().await;
        endpoint.set_state(ConnectionState::Open);

        let read = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            endpoint.next_payload(),
        )
        .await;
        assert!(read.is_err(), "no payload from the old session may surface");
        assert!(sink.contains("Discarded 1 unread payloads"));

        endpoint.publish_data(None, Message::payload(b"fresh".to_vec()));
        assert_eq!(endpoint.next_payload().await, Some(b"fresh".to_vec()));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}

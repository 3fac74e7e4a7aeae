//! The server role: a listener, an accept loop, and a registry of live
//! clients that every `send` broadcasts to.
//!
//! For each accepted socket the accept loop:
//!   1. generates a [`ClientId`] and registers the socket with a fresh
//!      cancellation token,
//!   2. spawns the client's receive task,
//!   3. after [`HANDSHAKE_DELAY`], sends `ConnectMessage` with the new id.
//!
//! The server never waits for the client to confirm the handshake; a
//! payload may arrive from a client that hasn't processed its id yet.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use hostlink_protocol::{ClientId, Codec, LogLevel, Message};
use hostlink_transport::{Connection, TcpConnection, TcpTransport, Transport};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{Dispatch, Endpoint, LoopExit, receive_loop};
use crate::registry::{ClientEntry, ClientRegistry};
use crate::{
    Communicator, ConnectionState, DataBridge, DataReceived, InitData, LogSink, StateChange,
    TracingSink,
};

/// Pause between registering a client and sending its `ConnectMessage`.
pub const HANDSHAKE_DELAY: Duration = Duration::from_millis(100);

/// The running accept loop.
struct Listener {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// The bound address, cleared by whichever side stops the listener.
type BoundAddr = Arc<std::sync::Mutex<Option<SocketAddr>>>;

/// Accepts many [`BridgeClient`](crate::BridgeClient)s and broadcasts to them.
///
/// # Example
///
/// ```rust,no_run
/// use hostlink::prelude::*;
///
/// # async fn run() -> Result<(), HostlinkError> {
/// let server = BridgeServer::new(InitData::new("127.0.0.1", 8888)?);
/// assert!(server.connect(None).await);
///
/// let mut inbox = server.subscribe_data();
/// while let Ok(event) = inbox.recv().await {
///     // Echo everything to every client.
///     server.send(&event.message).await;
/// }
/// # Ok(())
/// # }
/// ```
pub struct BridgeServer {
    init: InitData,
    endpoint: Arc<Endpoint>,
    registry: Arc<ClientRegistry>,
    listener: Mutex<Option<Listener>>,
    local_addr: BoundAddr,
}

impl BridgeServer {
    /// Creates a server that logs through [`TracingSink`].
    pub fn new(init: InitData) -> Self {
        Self {
            init,
            endpoint: Arc::new(Endpoint::new(Arc::new(TracingSink))),
            registry: Arc::new(ClientRegistry::new()),
            listener: Mutex::new(None),
            local_addr: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Replaces the log sink. Call before `connect`.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.endpoint = Arc::new(Endpoint::new(sink));
        self
    }

    pub fn init_data(&self) -> &InitData {
        &self.init
    }

    /// The bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Identifiers of every registered client.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.registry.ids()
    }

    /// Sends `message` to one client, evicting it if the write fails.
    pub async fn send_to(&self, client_id: &ClientId, message: &Message) -> bool {
        let Some(entry) = self.registry.get(client_id) else {
            self.endpoint.log(
                LogLevel::Warn,
                &format!("Cannot send {} to unknown client {client_id}", message.type_name()),
            );
            return false;
        };

        match self.endpoint.send_on(&entry.conn, message).await {
            Ok(()) => true,
            Err(e) => {
                self.endpoint
                    .log(LogLevel::Error, &format!("Failed to send to:{client_id}: {e}"));
                evict(&self.registry, &self.endpoint, client_id).await;
                false
            }
        }
    }
}

impl Communicator for BridgeServer {
    fn state(&self) -> ConnectionState {
        self.endpoint.state()
    }

    async fn connect(&self, cancel: Option<CancellationToken>) -> bool {
        self.disconnect().await;
        self.endpoint.reset_payloads().await;

        let mut listener = self.listener.lock().await;
        let addr = self.init.socket_addr();
        self.endpoint.set_state(ConnectionState::Connecting);

        let transport = match TcpTransport::bind(&addr).await {
            Ok(transport) => transport,
            Err(e) => {
                self.endpoint.log(
                    LogLevel::Error,
                    &format!("Failed to start listener on {addr}: {e}"),
                );
                self.endpoint.set_state(ConnectionState::Closed);
                return false;
            }
        };
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) =
            transport.local_addr().ok();

        let token = cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        self.endpoint.set_state(ConnectionState::Open);
        let task = tokio::spawn(accept_loop(
            transport,
            token.clone(),
            Arc::clone(&self.endpoint),
            Arc::clone(&self.registry),
            Arc::clone(&self.local_addr),
        ));
        *listener = Some(Listener { token, task });

        self.endpoint
            .log(LogLevel::Info, &format!("Tcp server listening at {addr}"));
        true
    }

    /// Broadcasts `message` to every registered client.
    ///
    /// A client whose write fails is evicted on the spot. Returns `false`
    /// if the server isn't running or any write failed.
    async fn send(&self, message: &Message) -> bool {
        if self.endpoint.state() != ConnectionState::Open {
            self.endpoint.log(
                LogLevel::Warn,
                &format!("Cannot send {}: server not running", message.type_name()),
            );
            return false;
        }

        let bytes = match self.endpoint.codec.encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.endpoint.log(
                    LogLevel::Error,
                    &format!("Failed to encode {}: {e}", message.type_name()),
                );
                return false;
            }
        };

        let started = Instant::now();
        let clients = self.registry.snapshot();
        let recipients = clients.len();
        let mut delivered_all = true;
        for (client_id, entry) in clients {
            self.endpoint
                .log(LogLevel::Debug, &format!("Sending to:{client_id}"));
            if let Err(e) = entry.conn.send(&bytes).await {
                self.endpoint
                    .log(LogLevel::Error, &format!("Failed to send to:{client_id}: {e}"));
                evict(&self.registry, &self.endpoint, &client_id).await;
                delivered_all = false;
            }
        }
        self.endpoint.log_elapsed(
            &format!("Broadcast {} to {recipients} clients", message.type_name()),
            started,
        );
        delivered_all
    }

    async fn disconnect(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };

        let running = self.endpoint.state() == ConnectionState::Open;
        if running {
            self.endpoint.set_state(ConnectionState::Closing);
        }

        // Client tokens are children of the listener token.
        listener.token.cancel();
        if let Err(e) = listener.task.await {
            self.endpoint
                .log(LogLevel::Error, &format!("Accept loop failed: {e}"));
        }
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if running {
            release_all(&self.registry, &self.endpoint).await;
            self.endpoint.set_state(ConnectionState::Closed);
            self.endpoint.log(
                LogLevel::Info,
                &format!("Tcp server at {} stopped", self.init.socket_addr()),
            );
        }
    }

    fn subscribe_data(&self) -> broadcast::Receiver<DataReceived> {
        self.endpoint.subscribe_data()
    }

    fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.endpoint.subscribe_state()
    }
}

impl DataBridge for BridgeServer {
    async fn read_message(&self) -> Option<Vec<u8>> {
        self.endpoint.next_payload().await
    }

    async fn write_message(&self, bytes: Vec<u8>) -> bool {
        self.send(&Message::payload(bytes)).await
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.token.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn accept_loop(
    mut transport: TcpTransport,
    token: CancellationToken,
    endpoint: Arc<Endpoint>,
    registry: Arc<ClientRegistry>,
    local_addr: BoundAddr,
) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = transport.accept() => accepted,
        };
        let conn = match accepted {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                endpoint.log(LogLevel::Error, &format!("Accept failed: {e}"));
                continue;
            }
        };

        let client_id = ClientId::generate();
        let client_token = token.child_token();
        registry.insert(
            client_id.clone(),
            ClientEntry {
                conn: Arc::clone(&conn),
                token: client_token.clone(),
            },
        );

        tokio::spawn(serve_client(
            client_id.clone(),
            Arc::clone(&conn),
            client_token.clone(),
            Arc::clone(&endpoint),
            Arc::clone(&registry),
        ));
        tokio::spawn(send_handshake(
            client_id.clone(),
            conn,
            client_token,
            Arc::clone(&endpoint),
            Arc::clone(&registry),
        ));

        endpoint.log(
            LogLevel::Debug,
            &format!("New client connection: {client_id}"),
        );
        endpoint.publish_state(StateChange::connected(client_id));
    }

    // The listener socket closes when `transport` drops at return.
    *local_addr.lock().unwrap_or_else(PoisonError::into_inner) = None;

    // Cancelled by the caller's token rather than by `disconnect()`.
    if endpoint.state() == ConnectionState::Open {
        endpoint.set_state(ConnectionState::Closing);
        release_all(&registry, &endpoint).await;
        endpoint.set_state(ConnectionState::Closed);
    }
}

/// Waits out [`HANDSHAKE_DELAY`], then grants the client its id.
async fn send_handshake(
    client_id: ClientId,
    conn: Arc<TcpConnection>,
    token: CancellationToken,
    endpoint: Arc<Endpoint>,
    registry: Arc<ClientRegistry>,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(HANDSHAKE_DELAY) => {}
    }

    if let Err(e) = endpoint
        .send_on(&conn, &Message::connect(client_id.clone()))
        .await
    {
        endpoint.log(
            LogLevel::Error,
            &format!("Handshake with {client_id} failed: {e}"),
        );
        evict(&registry, &endpoint, &client_id).await;
    }
}

/// Body of one client's receive task.
async fn serve_client(
    client_id: ClientId,
    conn: Arc<TcpConnection>,
    token: CancellationToken,
    endpoint: Arc<Endpoint>,
    registry: Arc<ClientRegistry>,
) {
    let peer = format!("client {client_id}");
    let exit = receive_loop(&conn, &token, &endpoint, &peer, |message| match message {
        Message::Connect { client_id: claimed } => {
            endpoint.log(
                LogLevel::Warn,
                &format!("Ignoring ConnectMessage from {client_id} (claims {claimed})"),
            );
            Dispatch::Continue
        }
        Message::Disconnect { .. } => {
            endpoint.log(LogLevel::Debug, &format!("ClientID:{client_id} disconnected"));
            Dispatch::Stop
        }
        other => {
            endpoint.publish_data(Some(client_id.clone()), other);
            Dispatch::Continue
        }
    })
    .await;

    // Whoever cancelled the token also removes the entry.
    if exit != LoopExit::Cancelled {
        evict(&registry, &endpoint, &client_id).await;
    }
}

/// Unregisters a client (cancelling its task first), closes its socket and
/// announces the departure. A no-op if someone else already evicted it.
async fn evict(registry: &ClientRegistry, endpoint: &Endpoint, client_id: &ClientId) {
    let Some(entry) = registry.remove(client_id) else {
        return;
    };
    let _ = entry.conn.close().await;
    endpoint.log(LogLevel::Debug, &format!("Removed client {client_id}"));
    endpoint.publish_state(StateChange::disconnected(client_id.clone()));
}

/// Closes every registered client, then clears the registry.
async fn release_all(registry: &ClientRegistry, endpoint: &Endpoint) {
    for client_id in registry.ids() {
        evict(registry, endpoint, &client_id).await;
    }
    registry.clear();
}

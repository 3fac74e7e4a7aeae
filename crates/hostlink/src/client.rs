//! The client role: one connection to one server, plus the identity the
//! server grants during the handshake.
//!
//! `connect()` returning `true` only means the socket is up and the receive
//! loop runs. The server's `ConnectMessage` arrives a moment later; wait for
//! the state event (or [`BridgeClient::wait_for_client_id`]) before relying
//! on [`BridgeClient::client_id`].

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use hostlink_protocol::{ClientId, LogLevel, Message};
use hostlink_transport::{Connection, TcpConnection};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{Dispatch, Endpoint, LoopExit, receive_loop};
use crate::{
    Communicator, ConnectionState, DataBridge, DataReceived, InitData, LogSink, StateChange,
    TracingSink,
};

/// The identity granted by the server, shared with the receive task.
type Identity = Arc<RwLock<Option<ClientId>>>;

/// A live socket and the task reading from it.
struct Link {
    conn: Arc<TcpConnection>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Connects to a [`BridgeServer`](crate::BridgeServer) and exchanges messages with it.
///
/// # Example
///
/// ```rust,no_run
/// use hostlink::prelude::*;
///
/// # async fn run() -> Result<(), HostlinkError> {
/// let client = BridgeClient::new(InitData::new("127.0.0.1", 8888)?);
/// if client.connect(None).await {
///     client.send(&Message::payload(b"hello".to_vec())).await;
///     client.disconnect().await;
/// }
/// # Ok(())
/// # }
/// ```
pub struct BridgeClient {
    init: InitData,
    endpoint: Arc<Endpoint>,
    identity: Identity,
    link: Mutex<Option<Link>>,
}

impl BridgeClient {
    /// Creates a client that logs through [`TracingSink`].
    pub fn new(init: InitData) -> Self {
        Self {
            init,
            endpoint: Arc::new(Endpoint::new(Arc::new(TracingSink))),
            identity: Arc::new(RwLock::new(None)),
            link: Mutex::new(None),
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

    /// The identifier the server assigned, once the handshake completed.
    pub fn client_id(&self) -> Option<ClientId> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits up to `timeout` for the server's handshake and returns the
    /// granted identifier.
    pub async fn wait_for_client_id(&self, timeout: Duration) -> Option<ClientId> {
        let mut events = self.endpoint.subscribe_state();
        if let Some(id) = self.client_id() {
            return Some(id);
        }
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(change) if change.connected => return Some(change.client_id),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(id) = self.client_id() {
                            return Some(id);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    async fn current_conn(&self) -> Option<Arc<TcpConnection>> {
        if self.endpoint.state() != ConnectionState::Open {
            return None;
        }
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| Arc::clone(&link.conn))
    }
}

impl Communicator for BridgeClient {
    fn state(&self) -> ConnectionState {
        self.endpoint.state()
    }

    async fn connect(&self, cancel: Option<CancellationToken>) -> bool {
        // Reconnecting starts from a clean slate.
        self.disconnect().await;
        self.endpoint.reset_payloads().await;

        let addr = self.init.socket_addr();
        self.endpoint.set_state(ConnectionState::Connecting);

        // The link lock is not held while dialing, so `disconnect()` can
        // abort a slow dial by moving the state off Connecting.
        let started = Instant::now();
        let conn = match TcpConnection::connect(&addr).await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                self.endpoint
                    .log(LogLevel::Error, &format!("Failed to connect to {addr}: {e}"));
                self.endpoint.set_state(ConnectionState::Closed);
                return false;
            }
        };
        self.endpoint.log_elapsed(&format!("Dial {addr}"), started);

        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            self.endpoint
                .log(LogLevel::Warn, &format!("Connection to {addr} cancelled"));
            let _ = conn.close().await;
            self.endpoint.set_state(ConnectionState::Closed);
            return false;
        }

        let mut link = self.link.lock().await;
        if link.is_some() || self.endpoint.state() != ConnectionState::Connecting {
            self.endpoint.log(
                LogLevel::Warn,
                &format!("Connection to {addr} abandoned while dialing"),
            );
            let _ = conn.close().await;
            return false;
        }

        let token = cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        // Open before the task exists, so a loop that dies at once can't
        // be overwritten by a late `Open`.
        self.endpoint.set_state(ConnectionState::Open);
        let task = tokio::spawn(run_receive_task(
            Arc::clone(&conn),
            token.clone(),
            Arc::clone(&self.endpoint),
            Arc::clone(&self.identity),
        ));
        *link = Some(Link { conn, token, task });

        self.endpoint
            .log(LogLevel::Info, &format!("Connected to {addr}"));
        true
    }

    async fn send(&self, message: &Message) -> bool {
        let Some(conn) = self.current_conn().await else {
            self.endpoint.log(
                LogLevel::Warn,
                &format!("Cannot send {}: not connected", message.type_name()),
            );
            return false;
        };

        match self.endpoint.send_on(&conn, message).await {
            Ok(()) => true,
            Err(e) => {
                self.endpoint.log(
                    LogLevel::Error,
                    &format!("Failed to send {}: {e}", message.type_name()),
                );
                false
            }
        }
    }

    async fn disconnect(&self) {
        let Some(link) = self.link.lock().await.take() else {
            // A dial in flight sees this and gives up.
            if self.endpoint.state() == ConnectionState::Connecting {
                self.endpoint.set_state(ConnectionState::Closed);
            }
            return;
        };

        if self.endpoint.state() != ConnectionState::Open {
            // The receive task already tore the link down.
            link.token.cancel();
            let _ = link.task.await;
            return;
        }

        self.endpoint.set_state(ConnectionState::Closing);

        let client_id = self.client_id().unwrap_or_default();
        if let Err(e) = self
            .endpoint
            .send_on(&link.conn, &Message::disconnect(client_id))
            .await
        {
            self.endpoint.log(
                LogLevel::Warn,
                &format!("Could not announce disconnect: {e}"),
            );
        }

        // Cancel and join before the socket goes away.
        link.token.cancel();
        if let Err(e) = link.task.await {
            self.endpoint
                .log(LogLevel::Error, &format!("Receive task failed: {e}"));
        }
        let _ = link.conn.close().await;

        clear_identity(&self.identity, &self.endpoint);
        self.endpoint.set_state(ConnectionState::Closed);
        self.endpoint.log(
            LogLevel::Info,
            &format!("Disconnected from {}", self.init.socket_addr()),
        );
    }

    fn subscribe_data(&self) -> broadcast::Receiver<DataReceived> {
        self.endpoint.subscribe_data()
    }

    fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.endpoint.subscribe_state()
    }
}

impl DataBridge for BridgeClient {
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

impl Drop for BridgeClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.token.cancel();
        }
    }
}

/// Body of the client's receive task.
async fn run_receive_task(
    conn: Arc<TcpConnection>,
    token: CancellationToken,
    endpoint: Arc<Endpoint>,
    identity: Identity,
) {
    let exit = receive_loop(&conn, &token, &endpoint, "server", |message| match message {
        Message::Connect { client_id } => {
            endpoint.log(LogLevel::Debug, &format!("ClientID:{client_id} connected"));
            *identity.write().unwrap_or_else(PoisonError::into_inner) = Some(client_id.clone());
            endpoint.publish_state(StateChange::connected(client_id));
            Dispatch::Continue
        }
        Message::Disconnect { client_id } => {
            endpoint.log(LogLevel::Debug, &format!("ClientID:{client_id} disconnected"));
            Dispatch::Stop
        }
        other => {
            endpoint.publish_data(None, other);
            Dispatch::Continue
        }
    })
    .await;

    // `disconnect()` moves to Closing before cancelling and finishes the
    // teardown itself. Any other exit (including the caller's own token
    // firing) is torn down here.
    if exit == LoopExit::Cancelled && endpoint.state() != ConnectionState::Open {
        return;
    }

    endpoint.set_state(ConnectionState::Closing);
    let _ = conn.close().await;
    clear_identity(&identity, &endpoint);
    endpoint.set_state(ConnectionState::Closed);
}

/// Forgets the granted identity and announces the teardown once.
fn clear_identity(identity: &Identity, endpoint: &Endpoint) {
    let previous = identity
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(client_id) = previous {
        endpoint.publish_state(StateChange::disconnected(client_id));
    }
}

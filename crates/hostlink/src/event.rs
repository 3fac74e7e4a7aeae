//! Events raised by the receive loops.
//!
//! Each kind of event has its own `broadcast` channel. Subscribing hands
//! out a receiver; dropping the receiver unsubscribes. Events are sent from
//! whichever task runs the receive loop, so consumers must not assume a
//! particular thread.

use hostlink_protocol::{ClientId, Message};

/// A decoded non-control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReceived {
    /// The client that sent it. Always `Some` on a server, `None` on a
    /// client (where the only peer is the server).
    pub peer: Option<ClientId>,
    pub message: Message,
}

/// A handshake or teardown transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub connected: bool,
    pub client_id: ClientId,
}

impl StateChange {
    pub fn connected(client_id: ClientId) -> Self {
        Self {
            connected: true,
            client_id,
        }
    }

    pub fn disconnected(client_id: ClientId) -> Self {
        Self {
            connected: false,
            client_id,
        }
    }
}

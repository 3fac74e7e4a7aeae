//! The server's live-client registry.
//!
//! A concurrent map from [`ClientId`] to the resources backing that client.
//! The accept loop inserts; the receive tasks, the broadcast path and
//! teardown remove. `DashMap` shards its locks, so iterating during a
//! concurrent removal never observes a half-written entry.
//!
//! Every removal cancels the entry's receive task first: an entry never
//! outlives its cancellation.

use std::sync::Arc;

use dashmap::DashMap;
use hostlink_protocol::ClientId;
use hostlink_transport::TcpConnection;
use tokio_util::sync::CancellationToken;

/// The resources of one registered client.
#[derive(Clone)]
pub(crate) struct ClientEntry {
    pub(crate) conn: Arc<TcpConnection>,
    pub(crate) token: CancellationToken,
}

#[derive(Default)]
pub(crate) struct ClientRegistry {
    clients: DashMap<ClientId, ClientEntry>,
}

impl ClientRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, client_id: ClientId, entry: ClientEntry) {
        self.clients.insert(client_id, entry);
    }

    pub(crate) fn get(&self, client_id: &ClientId) -> Option<ClientEntry> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    /// Cancels the client's receive task, then unregisters it.
    ///
    /// Only one of several concurrent callers gets `Some` back.
    pub(crate) fn remove(&self, client_id: &ClientId) -> Option<ClientEntry> {
        if let Some(entry) = self.clients.get(client_id) {
            entry.token.cancel();
        }
        self.clients.remove(client_id).map(|(_, entry)| entry)
    }

    /// A point-in-time copy of every entry. No shard lock is held once this
    /// returns, so callers may await while walking it.
    pub(crate) fn snapshot(&self) -> Vec<(ClientId, ClientEntry)> {
        self.clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub(crate) fn ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.len()
    }

    /// Cancels every entry, then empties the map.
    pub(crate) fn clear(&self) {
        for entry in self.clients.iter() {
            entry.token.cancel();
        }
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_transport::TcpTransport;
    use hostlink_transport::Transport;

    async fn entry() -> (ClientEntry, TcpConnection) {
        let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap().to_string();
        let dial = tokio::spawn(async move { TcpConnection::connect(&addr).await.unwrap() });
        let accepted = transport.accept().await.unwrap();
        let entry = ClientEntry {
            conn: Arc::new(accepted),
            token: CancellationToken::new(),
        };
        (entry, dial.await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_get_len() {
        let registry = ClientRegistry::new();
        let (e, _peer) = entry().await;
        let id = ClientId::generate();
        registry.insert(id.clone(), e);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).is_some());
        assert_eq!(registry.ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_remove_cancels_before_unregistering() {
        let registry = ClientRegistry::new();
        let (e, _peer) = entry().await;
        let token = e.token.clone();
        let id = ClientId::generate();
        registry.insert(id.clone(), e);

        let removed = registry.remove(&id);
        assert!(removed.is_some());
        assert!(token.is_cancelled());
        assert_eq!(registry.len(), 0);

        // Second removal is a no-op.
        assert!(registry.remove(&id).is_none());
    }

    #[tokio::test]
    async fn test_clear_cancels_everything() {
        let registry = ClientRegistry::new();
        let mut tokens = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let (e, peer) = entry().await;
            tokens.push(e.token.clone());
            peers.push(peer);
            registry.insert(ClientId::generate(), e);
        }

        assert_eq!(registry.snapshot().len(), 3);
        registry.clear();
        assert_eq!(registry.len(), 0);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}

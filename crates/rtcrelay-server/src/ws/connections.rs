use rtcrelay_protocol::SignalMessage;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SendError {
    #[error("failed to serialize message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection {0} is closed")]
    Closed(Uuid),
}

/// Outbound side of one live WebSocket connection.
///
/// The socket itself stays with the gateway task that accepted it; the
/// registry only keeps this handle so other connections can queue messages.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    connection_id: Uuid,
    sender: mpsc::UnboundedSender<String>,
}

impl PeerHandle {
    pub fn new(connection_id: Uuid, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn send(&self, message: &SignalMessage) -> Result<(), SendError> {
        let json = serde_json::to_string(message)?;
        self.sender
            .send(json)
            .map_err(|_| SendError::Closed(self.connection_id))
    }
}

/// Peer key -> live connection, shared by every signaling connection
pub struct SessionRegistry {
    peers: RwLock<HashMap<String, PeerHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite. Returns the handle previously stored under `key`.
    pub async fn register(&self, key: &str, handle: PeerHandle) -> Option<PeerHandle> {
        let previous = self.peers.write().await.insert(key.to_string(), handle);

        if let Some(previous) = &previous {
            tracing::debug!(
                "Peer {} re-registered, replacing connection {}",
                key,
                previous.connection_id
            );
        }

        previous
    }

    pub async fn lookup(&self, key: &str) -> Option<PeerHandle> {
        self.peers.read().await.get(key).cloned()
    }

    /// Remove `key` whatever connection it points at. Idempotent.
    pub async fn remove(&self, key: &str) -> Option<PeerHandle> {
        self.peers.write().await.remove(key)
    }

    /// Remove `key` only while it still points at `connection_id`.
    ///
    /// A connection tearing down must not evict a newer connection that
    /// registered the same key in the meantime.
    pub async fn remove_connection(&self, key: &str, connection_id: Uuid) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get(key) {
            Some(handle) if handle.connection_id == connection_id => {
                peers.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Apply `f` to every entry except `key`, each exactly once.
    /// Returns the number of peers visited.
    pub async fn for_each_except<F>(&self, key: &str, mut f: F) -> usize
    where
        F: FnMut(&str, &PeerHandle),
    {
        let peers = self.peers.read().await;
        let mut visited = 0;

        for (peer_key, handle) in peers.iter() {
            if peer_key == key {
                continue;
            }
            f(peer_key, handle);
            visited += 1;
        }

        visited
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.peers.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    pub async fn peer_keys(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

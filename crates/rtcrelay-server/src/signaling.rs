//! Signaling relay
//!
//! Routes offers, answers and ICE candidates between browser peers and
//! announces peers joining and leaving. The relay never looks inside the
//! payloads; negotiation retries are the browsers' business.

use crate::ws::connections::{PeerHandle, SessionRegistry};
use rtcrelay_protocol::{Command, SignalMessage};
use std::sync::Arc;

/// Per-connection signaling state, owned by the gateway task
#[derive(Debug)]
pub struct PeerSession {
    key: String,
    handle: PeerHandle,
    departed: bool,
}

impl PeerSession {
    pub fn new(key: impl Into<String>, handle: PeerHandle) -> Self {
        Self {
            key: key.into(),
            handle,
            departed: false,
        }
    }

    /// Whether a disconnect has already been announced for this connection
    #[cfg(test)]
    pub fn departed(&self) -> bool {
        self.departed
    }
}

pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Dispatch one decoded envelope from `session`'s connection
    pub async fn handle(&self, session: &mut PeerSession, message: SignalMessage) {
        match message.command {
            Command::Connect => {
                self.registry
                    .register(&session.key, session.handle.clone())
                    .await;
                session.departed = false;
                tracing::info!("Peer {} connected", session.key);

                self.broadcast(&session.key, |from, to| SignalMessage::connect(from, to))
                    .await;
            }
            Command::Offer | Command::Answer | Command::IceCandidate => {
                tracing::debug!(
                    "{:?} {} -> {}",
                    message.command,
                    message.from,
                    message.to
                );
                self.forward(message).await;
            }
            Command::Disconnect => {
                self.depart(session).await;
            }
            Command::Unknown => {}
        }
    }

    /// Forward an envelope unchanged to the peer named in `to`.
    /// An unknown recipient is not an error; it may just have left.
    pub async fn forward(&self, message: SignalMessage) {
        let Some(peer) = self.registry.lookup(&message.to).await else {
            tracing::debug!("Dropping {:?} for unknown peer {}", message.command, message.to);
            return;
        };

        if let Err(e) = peer.send(&message) {
            tracing::warn!("Failed to forward {:?} to {}: {}", message.command, message.to, e);
        }
    }

    /// Tear down after the connection's read loop ended, whatever the cause
    pub async fn close(&self, mut session: PeerSession) {
        if session.departed {
            // Already removed and announced by an explicit disconnect, but
            // the key may have been registered again since
            self.registry
                .remove_connection(&session.key, session.handle.connection_id())
                .await;
            return;
        }

        self.depart(&mut session).await;
    }

    async fn depart(&self, session: &mut PeerSession) {
        let removed = self
            .registry
            .remove_connection(&session.key, session.handle.connection_id())
            .await;

        // The key now belongs to a newer connection; that peer is still here
        if !removed && self.registry.contains(&session.key).await {
            tracing::debug!(
                "Peer {} superseded by a newer connection, not announcing disconnect",
                session.key
            );
            session.departed = true;
            return;
        }

        session.departed = true;
        tracing::info!("Peer {} disconnected", session.key);

        self.broadcast(&session.key, |from, to| SignalMessage::disconnect(from, to))
            .await;
    }

    /// Send `make(from, to)` to every registered peer except `from`.
    /// A failed send is logged and the broadcast carries on.
    async fn broadcast(&self, from: &str, make: fn(String, String) -> SignalMessage) {
        let mut failures = 0;

        let delivered = self
            .registry
            .for_each_except(from, |to, peer| {
                let message = make(from.to_string(), to.to_string());
                if let Err(e) = peer.send(&message) {
                    failures += 1;
                    tracing::warn!("Failed to notify {} of {:?} from {}: {}", to, message.command, from, e);
                }
            })
            .await;

        tracing::debug!(
            "Broadcast from {} reached {} peers ({} failed)",
            from,
            delivered - failures,
            failures
        );
    }
}

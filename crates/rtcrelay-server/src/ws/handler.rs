use crate::error::AppError;
use crate::signaling::PeerSession;
use crate::state::AppState;
use crate::ws::connections::PeerHandle;
use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::Response,
};
use futures_util::{
    FutureExt, SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use rtcrelay_protocol::{SfuRequest, SignalMessage};
use serde::{Deserialize, de::DeserializeOwned};
use std::error::Error as _;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PeerQuery {
    /// Peer key for the lifetime of the connection
    pub id: Option<String>,
}

/// Signaling relay endpoint. The peer key comes from `?id=`, or a fresh
/// UUID when the client did not pick one.
pub async fn signaling_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Query(query): Query<PeerQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let ws = upgrade.map_err(|e| {
        tracing::warn!("Rejected signaling upgrade: {}", e);
        AppError::Upgrade(e.to_string())
    })?;

    let key = query
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(ws
        .on_failed_upgrade(|e| tracing::error!("Signaling upgrade failed: {}", e))
        .on_upgrade(move |socket| handle_signaling(socket, key, state)))
}

/// SFU endpoint: publish/subscribe requests, one answer per request
pub async fn sfu_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let ws = upgrade.map_err(|e| {
        tracing::warn!("Rejected SFU upgrade: {}", e);
        AppError::Upgrade(e.to_string())
    })?;

    Ok(ws
        .on_failed_upgrade(|e| tracing::error!("SFU upgrade failed: {}", e))
        .on_upgrade(move |socket| handle_sfu(socket, state)))
}

async fn handle_signaling(socket: WebSocket, key: String, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    // Create channel for outbound messages
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let send_task = spawn_writer(sender, rx);

    let mut session = PeerSession::new(key.clone(), PeerHandle::new(connection_id, tx));
    let router = state.signaling.clone();

    tracing::info!("Signaling connection {} opened for peer {}", connection_id, key);

    let read_loop = async {
        loop {
            match next_envelope::<SignalMessage>(&mut receiver, &key).await {
                Frame::Envelope(message) => router.handle(&mut session, message).await,
                Frame::Skip => {}
                Frame::Exit => break,
            }
        }
    };

    if AssertUnwindSafe(read_loop).catch_unwind().await.is_err() {
        tracing::error!("Signaling loop for peer {} panicked", key);
    }

    // Runs on every exit path; drops our last sender so the writer drains and closes
    router.close(session).await;
    let _ = send_task.await;

    tracing::info!("Signaling connection {} for peer {} closed", connection_id, key);
}

async fn handle_sfu(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let send_task = spawn_writer(sender, rx);
    let sfu = state.sfu.clone();

    tracing::info!("SFU connection opened");

    let read_loop = async {
        loop {
            let request = match next_envelope::<SfuRequest>(&mut receiver, "sfu").await {
                Frame::Envelope(request) => request,
                Frame::Skip => continue,
                Frame::Exit => break,
            };

            let response = sfu.handle(request).await;
            match serde_json::to_string(&response) {
                Ok(json) => {
                    if tx.send(json).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to serialize SFU response: {}", e),
            }
        }
    };

    if AssertUnwindSafe(read_loop).catch_unwind().await.is_err() {
        tracing::error!("SFU loop panicked");
    }

    drop(tx);
    let _ = send_task.await;

    tracing::info!("SFU connection closed");
}

/// Forward queued messages to the socket, then close it once every sender is gone
fn spawn_writer(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                tracing::debug!("WebSocket write failed: {}", e);
                break;
            }
        }
        let _ = sender.close().await;
    })
}

enum Frame<T> {
    Envelope(T),
    /// Control frame or undecodable payload
    Skip,
    /// Closed, reset or failed; the loop is over
    Exit,
}

async fn next_envelope<T: DeserializeOwned>(
    receiver: &mut SplitStream<WebSocket>,
    peer: &str,
) -> Frame<T> {
    let payload = match receiver.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<T>(text.as_str()),
        Some(Ok(Message::Binary(bytes))) => serde_json::from_slice::<T>(&bytes),
        Some(Ok(Message::Close(frame))) => {
            tracing::debug!("Peer {} sent close: {:?}", peer, frame);
            return Frame::Exit;
        }
        // Pings are answered by the socket itself
        Some(Ok(_)) => return Frame::Skip,
        Some(Err(e)) => {
            if is_normal_close(&e) {
                tracing::debug!("Peer {} went away: {}", peer, e);
            } else {
                tracing::warn!("WebSocket error for peer {}: {}", peer, e);
            }
            return Frame::Exit;
        }
        None => return Frame::Exit,
    };

    match payload {
        Ok(envelope) => Frame::Envelope(envelope),
        Err(e) => {
            tracing::warn!("Invalid message from {}: {}", peer, e);
            Frame::Skip
        }
    }
}

/// Errors that only mean the other side left without ceremony
fn is_normal_close(error: &axum::Error) -> bool {
    let mut source = error.source();

    while let Some(err) = source {
        if let Some(ws) = err.downcast_ref::<tungstenite::Error>() {
            if matches!(
                ws,
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Protocol(
                        tungstenite::error::ProtocolError::ResetWithoutClosingHandshake
                    )
            ) {
                return true;
            }
        }

        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            );
        }

        source = err.source();
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn reset_and_broken_pipe_count_as_normal() {
        let reset = axum::Error::new(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(is_normal_close(&reset));

        let wrapped = axum::Error::new(tungstenite::Error::Io(io::Error::from(
            io::ErrorKind::BrokenPipe,
        )));
        assert!(is_normal_close(&wrapped));
    }

    #[test]
    fn other_failures_are_not_normal() {
        let refused = axum::Error::new(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!is_normal_close(&refused));

        let capacity = axum::Error::new(tungstenite::Error::Capacity(
            tungstenite::error::CapacityError::TooManyHeaders,
        ));
        assert!(!is_normal_close(&capacity));
    }
}

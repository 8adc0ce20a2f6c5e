//! Media engine seam
//!
//! Everything the SFU needs from the WebRTC stack, expressed as traits so the
//! routing logic can be driven without real network sessions. The production
//! implementation lives in [`super::session`].
//!
//! Event contract: every session hands out one event stream. Inbound tracks
//! may be reported any number of times; `Terminated` is reported at most once
//! and nothing follows it.

use async_trait::async_trait;
use rtcrelay_media::TrackKind;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Session events were already taken")]
    EventsTaken,

    #[error("No local description after negotiation")]
    NoLocalDescription,

    #[error("{0}")]
    Other(String),
}

/// Why a session stopped carrying media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Failed,
    Disconnected,
    Closed,
}

#[derive(Debug)]
pub enum SessionEvent<I> {
    /// ICE connectivity established
    Connected,
    /// The remote peer started sending a track
    InboundTrack(Arc<I>),
    /// Connectivity failed, dropped or was closed
    Terminated(TerminalState),
}

/// A track received from a publisher
#[async_trait]
pub trait InboundTrack: Send + Sync + 'static {
    fn id(&self) -> String;

    fn ssrc(&self) -> u32;

    /// Negotiated codec, e.g. `video/VP8`
    fn mime_type(&self) -> String;

    /// Wait for the next RTP packet. An error means the track is gone.
    async fn read_rtp(&self) -> Result<Packet, EngineError>;
}

/// A local track fed by a publisher's pump and attached to subscriber sessions.
///
/// Implementations must tolerate one writer and any number of attached
/// sessions concurrently.
#[async_trait]
pub trait OutboundTrack: Send + Sync + 'static {
    async fn write_rtp(&self, packet: &Packet) -> Result<(), EngineError>;
}

#[async_trait]
pub trait MediaSession: Send + Sync + 'static {
    type Inbound: InboundTrack;
    type Outbound: OutboundTrack;

    /// Ask for one inbound transceiver of `kind`
    async fn add_receiver(&self, kind: TrackKind) -> Result<(), EngineError>;

    /// Attach a stored outbound track so this session receives it
    async fn add_track(&self, track: Arc<Self::Outbound>) -> Result<(), EngineError>;

    /// Create a local track with the same codec as `source`, labelled for `stream`
    async fn create_outbound_track(
        &self,
        source: &Self::Inbound,
        kind: TrackKind,
        stream: &str,
    ) -> Result<Arc<Self::Outbound>, EngineError>;

    /// Send a picture loss indication for `media_ssrc` back to the remote peer
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), EngineError>;

    /// Apply a remote offer and return the local answer SDP
    async fn answer(&self, offer_sdp: String) -> Result<String, EngineError>;

    /// The session's event stream. Only the first call gets it.
    async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent<Self::Inbound>>>;

    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    type Session: MediaSession;

    async fn new_session(&self) -> Result<Arc<Self::Session>, EngineError>;
}

pub type OutboundOf<E> = <<E as MediaEngine>::Session as MediaSession>::Outbound;

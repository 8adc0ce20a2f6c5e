//! In-memory media engine for exercising the SFU router without sockets

use super::engine::{
    EngineError, InboundTrack, MediaEngine, MediaSession, OutboundTrack, SessionEvent,
    TerminalState,
};
use async_trait::async_trait;
use rtcrelay_media::TrackKind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

#[derive(Default)]
pub struct FakeEngine {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    fail_new_sessions: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_new_sessions(&self, fail: bool) {
        self.fail_new_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn last_session(&self) -> Arc<FakeSession> {
        self.sessions.lock().unwrap().last().cloned().unwrap()
    }

    /// The session that was handed `offer_sdp`
    pub fn session_for_offer(&self, offer_sdp: &str) -> Arc<FakeSession> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.offer.lock().unwrap().as_deref() == Some(offer_sdp))
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    type Session = FakeSession;

    async fn new_session(&self) -> Result<Arc<FakeSession>, EngineError> {
        if self.fail_new_sessions.load(Ordering::SeqCst) {
            return Err(EngineError::Other("session creation refused".to_string()));
        }

        let session = Arc::new(FakeSession::new());
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub struct FakeSession {
    receivers: Mutex<Vec<TrackKind>>,
    attached: Mutex<Vec<Arc<FakeOutbound>>>,
    events_tx: mpsc::UnboundedSender<SessionEvent<FakeInbound>>,
    events_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<SessionEvent<FakeInbound>>>>,
    offer: Mutex<Option<String>>,
    keyframes: AtomicUsize,
    closed: AtomicBool,
}

impl FakeSession {
    fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            receivers: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
            offer: Mutex::new(None),
            keyframes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulate the remote peer starting a track. Packets sent on the
    /// returned channel show up on the inbound track; dropping it ends the track.
    pub fn emit_track(&self, mime_type: &str, ssrc: u32) -> mpsc::UnboundedSender<Packet> {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = FakeInbound {
            id: format!("track-{ssrc}"),
            ssrc,
            mime_type: mime_type.to_string(),
            packets: tokio::sync::Mutex::new(rx),
        };
        let _ = self.events_tx.send(SessionEvent::InboundTrack(Arc::new(track)));
        tx
    }

    pub fn connect(&self) {
        let _ = self.events_tx.send(SessionEvent::Connected);
    }

    pub fn terminate(&self, state: TerminalState) {
        let _ = self.events_tx.send(SessionEvent::Terminated(state));
    }

    pub fn receivers(&self) -> Vec<TrackKind> {
        self.receivers.lock().unwrap().clone()
    }

    pub fn attached(&self) -> Vec<Arc<FakeOutbound>> {
        self.attached.lock().unwrap().clone()
    }

    pub fn attached_kinds(&self) -> Vec<TrackKind> {
        self.attached().iter().map(|t| t.kind).collect()
    }

    pub fn keyframe_requests(&self) -> usize {
        self.keyframes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSession for FakeSession {
    type Inbound = FakeInbound;
    type Outbound = FakeOutbound;

    async fn add_receiver(&self, kind: TrackKind) -> Result<(), EngineError> {
        self.receivers.lock().unwrap().push(kind);
        Ok(())
    }

    async fn add_track(&self, track: Arc<FakeOutbound>) -> Result<(), EngineError> {
        self.attached.lock().unwrap().push(track);
        Ok(())
    }

    async fn create_outbound_track(
        &self,
        _source: &FakeInbound,
        kind: TrackKind,
        stream: &str,
    ) -> Result<Arc<FakeOutbound>, EngineError> {
        Ok(Arc::new(FakeOutbound {
            kind,
            stream: stream.to_string(),
            written: AtomicUsize::new(0),
        }))
    }

    async fn request_keyframe(&self, _media_ssrc: u32) -> Result<(), EngineError> {
        self.keyframes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn answer(&self, offer_sdp: String) -> Result<String, EngineError> {
        *self.offer.lock().unwrap() = Some(offer_sdp.clone());
        if !offer_sdp.starts_with("v=0") {
            return Err(EngineError::Other("malformed offer".to_string()));
        }
        Ok(format!("answer-for:{offer_sdp}"))
    }

    async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent<FakeInbound>>> {
        self.events_rx.lock().await.take()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeInbound {
    id: String,
    ssrc: u32,
    mime_type: String,
    packets: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

#[async_trait]
impl InboundTrack for FakeInbound {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn mime_type(&self) -> String {
        self.mime_type.clone()
    }

    async fn read_rtp(&self) -> Result<Packet, EngineError> {
        self.packets
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| EngineError::Other("track closed".to_string()))
    }
}

#[derive(Debug)]
pub struct FakeOutbound {
    pub kind: TrackKind,
    pub stream: String,
    written: AtomicUsize,
}

impl FakeOutbound {
    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundTrack for FakeOutbound {
    async fn write_rtp(&self, _packet: &Packet) -> Result<(), EngineError> {
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//! SFU sessions backed by webrtc-rs
//!
//! One [`WebRtcEngine`] is shared by every request; each publish or
//! subscribe gets its own [`WebRtcSession`] wrapping a peer connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rtcrelay_media::TrackKind;
use tokio::sync::{Mutex, mpsc};
use webrtc::api::API;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::engine::{
    EngineError, InboundTrack, MediaEngine, MediaSession, OutboundTrack, SessionEvent,
    TerminalState,
};

type EventSender = mpsc::UnboundedSender<SessionEvent<WebRtcInbound>>;
type EventReceiver = mpsc::UnboundedReceiver<SessionEvent<WebRtcInbound>>;

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

/// Shared WebRTC API: default codecs and interceptors, UDP4 only
pub struct WebRtcEngine {
    api: Arc<API>,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngine {
    pub fn new(stun_servers: &[String]) -> Result<Self, EngineError> {
        let mut codecs = CodecRegistry::default();
        codecs.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut codecs)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_network_types(vec![NetworkType::Udp4]);

        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        let ice_servers = stun_servers
            .iter()
            .filter(|url| !url.is_empty())
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        Ok(Self {
            api: Arc::new(api),
            ice_servers,
        })
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    type Session = WebRtcSession;

    async fn new_session(&self) -> Result<Arc<WebRtcSession>, EngineError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);
        Ok(Arc::new(WebRtcSession::new(peer_connection)))
    }
}

pub struct WebRtcSession {
    peer_connection: Arc<RTCPeerConnection>,
    events: Mutex<Option<EventReceiver>>,
}

impl WebRtcSession {
    fn new(peer_connection: Arc<RTCPeerConnection>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));

        Self::watch_ice_state(&peer_connection, tx.clone(), terminated);
        Self::watch_tracks(&peer_connection, tx);

        Self {
            peer_connection,
            events: Mutex::new(Some(rx)),
        }
    }

    fn watch_ice_state(
        peer_connection: &Arc<RTCPeerConnection>,
        tx: EventSender,
        terminated: Arc<AtomicBool>,
    ) {
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                tracing::debug!("ICE connection state changed: {}", state);

                let event = match state {
                    RTCIceConnectionState::Connected => Some(SessionEvent::Connected),
                    RTCIceConnectionState::Failed => Some(SessionEvent::Terminated(TerminalState::Failed)),
                    RTCIceConnectionState::Disconnected => {
                        Some(SessionEvent::Terminated(TerminalState::Disconnected))
                    }
                    RTCIceConnectionState::Closed => Some(SessionEvent::Terminated(TerminalState::Closed)),
                    _ => None,
                };

                let Some(event) = event else {
                    return Box::pin(async {});
                };

                // Terminated goes out once and nothing follows it
                if terminated.load(Ordering::SeqCst)
                    || (matches!(event, SessionEvent::Terminated(_))
                        && terminated.swap(true, Ordering::SeqCst))
                {
                    return Box::pin(async {});
                }

                let _ = tx.send(event);
                Box::pin(async {})
            },
        ));
    }

    fn watch_tracks(peer_connection: &Arc<RTCPeerConnection>, tx: EventSender) {
        peer_connection.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            tracing::info!(
                "Track received: kind={}, id={}, ssrc={}",
                track.kind(),
                track.id(),
                track.ssrc()
            );
            let _ = tx.send(SessionEvent::InboundTrack(Arc::new(WebRtcInbound { track })));
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl MediaSession for WebRtcSession {
    type Inbound = WebRtcInbound;
    type Outbound = WebRtcOutbound;

    async fn add_receiver(&self, kind: TrackKind) -> Result<(), EngineError> {
        self.peer_connection
            .add_transceiver_from_kind(
                codec_type(kind),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<WebRtcOutbound>) -> Result<(), EngineError> {
        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track.inner) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Incoming RTCP has to be read for interceptors (NACK, reports) to run
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn create_outbound_track(
        &self,
        source: &WebRtcInbound,
        kind: TrackKind,
        stream: &str,
    ) -> Result<Arc<WebRtcOutbound>, EngineError> {
        let inner = Arc::new(TrackLocalStaticRTP::new(
            source.track.codec().capability,
            kind.as_str().to_string(),
            stream.to_string(),
        ));

        Ok(Arc::new(WebRtcOutbound { inner }))
    }

    async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), EngineError> {
        let pli = PictureLossIndication {
            sender_ssrc: 0,
            media_ssrc,
        };
        self.peer_connection.write_rtcp(&[Box::new(pli)]).await?;
        Ok(())
    }

    async fn answer(&self, offer_sdp: String) -> Result<String, EngineError> {
        let offer = RTCSessionDescription::offer(offer_sdp)?;
        self.peer_connection.set_remote_description(offer).await?;

        let answer = self.peer_connection.create_answer(None).await?;

        // Answer with every candidate included; there is no trickle channel
        let mut gathering_complete = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection.set_local_description(answer).await?;
        let _ = gathering_complete.recv().await;

        self.peer_connection
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or(EngineError::NoLocalDescription)
    }

    async fn take_events(&self) -> Option<EventReceiver> {
        self.events.lock().await.take()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}

pub struct WebRtcInbound {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl InboundTrack for WebRtcInbound {
    fn id(&self) -> String {
        self.track.id()
    }

    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    fn mime_type(&self) -> String {
        self.track.codec().capability.mime_type
    }

    async fn read_rtp(&self) -> Result<Packet, EngineError> {
        let (packet, _attributes) = self.track.read_rtp().await?;
        Ok(packet)
    }
}

/// Fan-out track: written by one publisher pump, bound to any number of
/// subscriber sessions
pub struct WebRtcOutbound {
    inner: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl OutboundTrack for WebRtcOutbound {
    async fn write_rtp(&self, packet: &Packet) -> Result<(), EngineError> {
        match self.inner.write_rtp(packet).await {
            Ok(_) | Err(webrtc::Error::ErrClosedPipe) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

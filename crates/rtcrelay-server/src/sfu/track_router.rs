//! Track Router for RTP forwarding
//!
//! A publisher's inbound tracks are pumped into outbound tracks stored under
//! the stream name. Subscribers get those outbound tracks attached to their
//! own session, so one publisher pump fans out to every subscriber.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rtcrelay_media::{MediaCodec, StreamRecorder, TrackKind};
use rtcrelay_protocol::{SfuRequest, SfuResponse};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::engine::{
    EngineError, InboundTrack, MediaEngine, MediaSession, OutboundOf, OutboundTrack, SessionEvent,
};
use super::tracks::{TrackPair, TrackRetention, TrackStore};
use crate::error::SfuError;

/// How often a publisher is asked for a fresh keyframe
pub const KEYFRAME_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SfuSettings {
    /// Directory for `<stream>.ivf` / `<stream>.ogg`; `None` disables recording
    pub recordings_dir: Option<PathBuf>,
    pub retention: TrackRetention,
}

pub struct SfuRouter<E: MediaEngine> {
    engine: Arc<E>,
    tracks: Arc<TrackStore<OutboundOf<E>>>,
    settings: SfuSettings,
}

impl<E: MediaEngine> SfuRouter<E> {
    pub fn new(engine: Arc<E>, settings: SfuSettings) -> Self {
        Self {
            engine,
            tracks: Arc::new(TrackStore::new()),
            settings,
        }
    }

    pub fn tracks(&self) -> &Arc<TrackStore<OutboundOf<E>>> {
        &self.tracks
    }

    /// Serve one request. Failures come back as an error envelope and leave
    /// every stored stream untouched.
    pub async fn handle(&self, request: SfuRequest) -> SfuResponse {
        self.tracks.ensure(request.name()).await;

        match request {
            SfuRequest::Publish { sdp, name } => match self.publish(&name, sdp).await {
                Ok(answer) => SfuResponse::Publish { sdp: answer, name },
                Err(e) => {
                    tracing::warn!("Publish of stream {} failed: {}", name, e);
                    SfuResponse::Error {
                        message: e.to_string(),
                    }
                }
            },
            SfuRequest::Subscribe { sdp, name } => match self.subscribe(&name, sdp).await {
                Ok(answer) => SfuResponse::Subscribe { sdp: answer, name },
                Err(e) => {
                    tracing::warn!("Subscribe to stream {} failed: {}", name, e);
                    SfuResponse::Error {
                        message: e.to_string(),
                    }
                }
            },
        }
    }

    /// Accept a publisher's offer for `name` and return the answer SDP.
    ///
    /// Inbound tracks are wired up in the background as the engine reports
    /// them, until the session terminates.
    pub async fn publish(&self, name: &str, offer_sdp: String) -> Result<String, SfuError> {
        let session = self.engine.new_session().await?;

        let negotiated = match Self::negotiate_publisher(&session, offer_sdp).await {
            Ok(negotiated) => self.open_recorder(name).map(|recorder| (negotiated, recorder)),
            Err(e) => Err(e),
        };

        match negotiated {
            Ok(((answer, events), recorder)) => {
                tracing::info!("Publisher session started for stream {}", name);

                let publisher = Publisher {
                    name: name.to_string(),
                    session,
                    tracks: self.tracks.clone(),
                    recorder,
                    retention: self.settings.retention,
                    shutdown: CancellationToken::new(),
                    owned: TrackPair::default(),
                };
                tokio::spawn(publisher.run(events));

                Ok(answer)
            }
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    tracing::debug!("Error closing failed publisher session: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn negotiate_publisher(
        session: &Arc<E::Session>,
        offer_sdp: String,
    ) -> Result<(String, EventStream<E::Session>), SfuError> {
        session.add_receiver(TrackKind::Audio).await?;
        session.add_receiver(TrackKind::Video).await?;

        let events = session.take_events().await.ok_or(EngineError::EventsTaken)?;
        let answer = session.answer(offer_sdp).await?;

        Ok((answer, events))
    }

    /// Truncates `<name>.ivf` / `<name>.ogg`; only call once the offer was
    /// accepted. Tracks reported before that wait in the event channel.
    fn open_recorder(&self, name: &str) -> Result<Option<Arc<StreamRecorder>>, SfuError> {
        match &self.settings.recordings_dir {
            Some(dir) => Ok(Some(Arc::new(StreamRecorder::create(dir, name)?))),
            None => Ok(None),
        }
    }

    /// Attach whatever is currently published under `name` to a new
    /// subscriber session and return the answer SDP. Nothing published is
    /// not an error; the session simply negotiates no media.
    pub async fn subscribe(&self, name: &str, offer_sdp: String) -> Result<String, SfuError> {
        let pair = self.tracks.get(name).await;
        let session = self.engine.new_session().await?;

        match Self::negotiate_subscriber(&session, &pair, offer_sdp).await {
            Ok((answer, events)) => {
                tracing::info!(
                    "Subscriber session started for stream {} (video: {}, audio: {})",
                    name,
                    pair.video.is_some(),
                    pair.audio.is_some()
                );
                tokio::spawn(watch_subscriber(session, events, name.to_string()));
                Ok(answer)
            }
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    tracing::debug!("Error closing failed subscriber session: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn negotiate_subscriber(
        session: &Arc<E::Session>,
        pair: &TrackPair<OutboundOf<E>>,
        offer_sdp: String,
    ) -> Result<(String, EventStream<E::Session>), SfuError> {
        for track in pair.tracks() {
            session.add_track(track).await?;
        }

        let events = session.take_events().await.ok_or(EngineError::EventsTaken)?;
        let answer = session.answer(offer_sdp).await?;

        Ok((answer, events))
    }
}

type EventStream<S> = mpsc::UnboundedReceiver<SessionEvent<<S as MediaSession>::Inbound>>;

/// Lifetime of one publisher session: wires inbound tracks as they appear
/// and tears everything down once the session terminates.
struct Publisher<S: MediaSession> {
    name: String,
    session: Arc<S>,
    tracks: Arc<TrackStore<S::Outbound>>,
    recorder: Option<Arc<StreamRecorder>>,
    retention: TrackRetention,
    /// Parent of every keyframe and pump task this publisher spawned
    shutdown: CancellationToken,
    /// Tracks this publisher put into the store
    owned: TrackPair<S::Outbound>,
}

impl<S: MediaSession> Publisher<S> {
    async fn run(mut self, mut events: EventStream<S>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected => {
                    tracing::info!("Publisher for stream {} connected", self.name);
                }
                SessionEvent::InboundTrack(track) => self.on_track(track).await,
                SessionEvent::Terminated(state) => {
                    tracing::info!("Publisher for stream {} terminated: {:?}", self.name, state);
                    break;
                }
            }
        }

        self.shutdown.cancel();

        if let Some(recorder) = &self.recorder {
            recorder.close().await;
        }

        if self.retention == TrackRetention::PruneOnDisconnect {
            let cleared = self.tracks.release(&self.name, &self.owned).await;
            tracing::debug!("Pruned {} tracks of stream {}", cleared, self.name);
        }

        if let Err(e) = self.session.close().await {
            tracing::debug!("Error closing publisher session for {}: {}", self.name, e);
        }
    }

    async fn on_track(&mut self, inbound: Arc<S::Inbound>) {
        let codec = MediaCodec::from_mime(&inbound.mime_type());
        let kind = codec.kind();

        if self.owned.get(kind).is_some() {
            tracing::warn!(
                "Stream {} already has a {} track, ignoring {}",
                self.name,
                kind,
                inbound.id()
            );
            return;
        }

        let outbound = match self
            .session
            .create_outbound_track(&inbound, kind, &self.name)
            .await
        {
            Ok(track) => track,
            Err(e) => {
                tracing::warn!(
                    "Failed to create outbound {} track for stream {}: {}",
                    kind,
                    self.name,
                    e
                );
                return;
            }
        };

        self.tracks.publish(&self.name, kind, outbound.clone()).await;
        self.owned.set(kind, outbound.clone());

        tracing::info!(
            "Stream {} publishing {} track {} ({}, ssrc {})",
            self.name,
            kind,
            inbound.id(),
            inbound.mime_type(),
            inbound.ssrc()
        );

        let token = self.shutdown.child_token();
        tokio::spawn(request_keyframes(
            self.session.clone(),
            inbound.ssrc(),
            token.clone(),
        ));
        tokio::spawn(pump(
            inbound,
            outbound,
            codec,
            self.recorder.clone(),
            token,
        ));
    }
}

/// Ask the publisher for a keyframe every [`KEYFRAME_INTERVAL`] until cancelled
async fn request_keyframes<S: MediaSession>(
    session: Arc<S>,
    media_ssrc: u32,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + KEYFRAME_INTERVAL, KEYFRAME_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = session.request_keyframe(media_ssrc).await {
                    tracing::debug!("Keyframe request for ssrc {} failed: {}", media_ssrc, e);
                }
            }
        }
    }

    tracing::debug!("Keyframe requests for ssrc {} stopped", media_ssrc);
}

/// Copy every inbound packet to the outbound track and the recording.
/// Ends when the inbound track does, releasing its container.
async fn pump<I: InboundTrack, O: OutboundTrack>(
    inbound: Arc<I>,
    outbound: Arc<O>,
    codec: MediaCodec,
    recorder: Option<Arc<StreamRecorder>>,
    token: CancellationToken,
) {
    let mut packet_count = 0u64;

    loop {
        let packet = tokio::select! {
            _ = token.cancelled() => break,
            result = inbound.read_rtp() => match result {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::info!("Inbound track {} ended: {}", inbound.id(), e);
                    break;
                }
            },
        };
        packet_count += 1;

        if let Err(e) = outbound.write_rtp(&packet).await {
            if packet_count % 100 == 1 {
                tracing::warn!("Error forwarding RTP from {}: {}", inbound.id(), e);
            }
        }

        if let Some(recorder) = &recorder {
            recorder.write(codec, &packet).await;
        }

        if packet_count % 500 == 1 {
            tracing::debug!(
                "Forwarded packet {} from {} (seq: {}, payload: {} bytes)",
                packet_count,
                inbound.id(),
                packet.header.sequence_number,
                packet.payload.len()
            );
        }
    }

    if let Some(recorder) = &recorder {
        recorder.close_for(codec).await;
    }
    token.cancel();

    tracing::debug!("Pump for {} stopped after {} packets", inbound.id(), packet_count);
}

/// Keep a subscriber session until the engine reports it gone, then close it
async fn watch_subscriber<S: MediaSession>(session: Arc<S>, mut events: EventStream<S>, name: String) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected => {
                tracing::info!("Subscriber to stream {} connected", name);
            }
            SessionEvent::InboundTrack(track) => {
                tracing::debug!("Ignoring inbound track {} on subscriber session", track.id());
            }
            SessionEvent::Terminated(state) => {
                tracing::info!("Subscriber to stream {} terminated: {:?}", name, state);
                break;
            }
        }
    }

    if let Err(e) = session.close().await {
        tracing::debug!("Error closing subscriber session for {}: {}", name, e);
    }
}

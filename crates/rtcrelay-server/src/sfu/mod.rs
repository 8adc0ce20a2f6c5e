//! SFU (Selective Forwarding Unit) for published streams
//!
//! A publisher sends audio and video for a stream name; the SFU forwards the
//! RTP packets unchanged to every subscriber of that name, without decoding
//! or transcoding, and records them to disk.

mod engine;
#[cfg(test)]
mod fake;
mod session;
mod track_router;
mod tracks;

pub use engine::{
    EngineError, InboundTrack, MediaEngine, MediaSession, OutboundOf, OutboundTrack,
    SessionEvent, TerminalState,
};
pub use session::{WebRtcEngine, WebRtcInbound, WebRtcOutbound, WebRtcSession};
pub use track_router::{KEYFRAME_INTERVAL, SfuRouter, SfuSettings};
pub use tracks::{TrackPair, TrackRetention, TrackStore};

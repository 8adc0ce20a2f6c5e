//! Codec utilities
//!
//! Classifies negotiated RTP codecs by MIME type. The relay never decodes
//! media; it only needs to know which slot a track belongs in and which
//! container, if any, can store it.

use std::fmt;

use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9};

/// Kind of media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video codec type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    VP8,
    VP9,
    H264,
}

/// Codec of an inbound track, as far as the relay cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCodec {
    Video(VideoCodec),
    Opus,
    /// Anything else; forwarded as audio but never recorded
    Other,
}

impl MediaCodec {
    /// Classify a negotiated MIME type such as `video/VP8` or `audio/opus`
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.eq_ignore_ascii_case(MIME_TYPE_VP8) {
            MediaCodec::Video(VideoCodec::VP8)
        } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_VP9) {
            MediaCodec::Video(VideoCodec::VP9)
        } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_H264) {
            MediaCodec::Video(VideoCodec::H264)
        } else if mime_type.eq_ignore_ascii_case(MIME_TYPE_OPUS) {
            MediaCodec::Opus
        } else {
            MediaCodec::Other
        }
    }

    /// Track slot this codec fills. Only the known video families count as video.
    pub fn kind(&self) -> TrackKind {
        match self {
            MediaCodec::Video(_) => TrackKind::Video,
            MediaCodec::Opus | MediaCodec::Other => TrackKind::Audio,
        }
    }
}

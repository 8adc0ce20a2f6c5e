//! Stream recording
//!
//! Every published stream is written to two container files next to each
//! other: `<name>.ivf` for VP8 video and `<name>.ogg` for Opus audio.

use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;
use webrtc::media::io::Writer;
use webrtc::media::io::ivf_reader::IVFFileHeader;
use webrtc::media::io::ivf_writer::IVFWriter;
use webrtc::media::io::ogg_writer::OggWriter;
use webrtc::rtp::packet::Packet;

use crate::codec::{MediaCodec, VideoCodec};

/// Audio sample rate of recorded Opus streams (48kHz)
pub const SAMPLE_RATE: u32 = 48000;

/// Audio channels of recorded Opus streams (stereo)
pub const CHANNELS: u8 = 2;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container error: {0}")]
    Media(#[from] webrtc::media::Error),
}

/// File paths used for a stream name: `(video, audio)`
///
/// Stream names come from clients. ASCII alphanumerics and `-` are kept as
/// they are; every other byte, `_` included, is written as `_` plus two hex
/// digits, so distinct names never share a file. The empty name becomes `_`.
pub fn recording_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let mut stem = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            let _ = write!(stem, "_{byte:02x}");
        }
    }
    if stem.is_empty() {
        stem.push('_');
    }

    (dir.join(format!("{stem}.ivf")), dir.join(format!("{stem}.ogg")))
}

struct Sink {
    label: &'static str,
    path: PathBuf,
    writer: Mutex<Option<Box<dyn Writer + Send>>>,
}

impl Sink {
    fn new(label: &'static str, path: PathBuf, writer: Box<dyn Writer + Send>) -> Self {
        Self {
            label,
            path,
            writer: Mutex::new(Some(writer)),
        }
    }

    async fn write(&self, packet: &Packet) {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };

        if let Err(e) = writer.write_rtp(packet) {
            // A broken sink stays broken; stop recording rather than log every packet
            tracing::warn!(
                "Failed to write {} packet to {}, recording stopped: {}",
                self.label,
                self.path.display(),
                e
            );
            if let Some(mut writer) = guard.take() {
                let _ = writer.close();
            }
        }
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            match writer.close() {
                Ok(()) => tracing::info!("Finalized {} recording {}", self.label, self.path.display()),
                Err(e) => tracing::warn!("Error closing {}: {}", self.path.display(), e),
            }
        }
    }

    #[cfg(test)]
    async fn is_open(&self) -> bool {
        self.writer.lock().await.is_some()
    }
}

/// IVF + Ogg recording of one published stream
pub struct StreamRecorder {
    video: Sink,
    audio: Sink,
}

impl StreamRecorder {
    /// Create (or truncate) both container files for `name` inside `dir`
    pub fn create(dir: &Path, name: &str) -> Result<Self, RecordError> {
        let (video_path, audio_path) = recording_paths(dir, name);

        let ivf = IVFWriter::new(
            File::create(&video_path)?,
            &IVFFileHeader {
                signature: *b"DKIF",
                version: 0,
                header_size: 32,
                four_cc: *b"VP80",
                width: 640,
                height: 480,
                timebase_denominator: 30,
                timebase_numerator: 1,
                num_frames: 900,
                unused: 0,
            },
        )?;
        let ogg = OggWriter::new(File::create(&audio_path)?, SAMPLE_RATE, CHANNELS)?;

        tracing::debug!(
            "Recording stream {} to {} and {}",
            name,
            video_path.display(),
            audio_path.display()
        );

        Ok(Self {
            video: Sink::new("video", video_path, Box::new(ivf)),
            audio: Sink::new("audio", audio_path, Box::new(ogg)),
        })
    }

    fn sink_for(&self, codec: MediaCodec) -> Option<&Sink> {
        match codec {
            MediaCodec::Video(VideoCodec::VP8) => Some(&self.video),
            MediaCodec::Opus => Some(&self.audio),
            _ => None,
        }
    }

    /// Append a packet to the container matching its codec.
    /// Codecs without a container are skipped.
    pub async fn write(&self, codec: MediaCodec, packet: &Packet) {
        if let Some(sink) = self.sink_for(codec) {
            sink.write(packet).await;
        }
    }

    /// Close the container that packets of `codec` go to
    pub async fn close_for(&self, codec: MediaCodec) {
        if let Some(sink) = self.sink_for(codec) {
            sink.close().await;
        }
    }

    /// Finalize both containers. Safe to call more than once.
    pub async fn close(&self) {
        self.video.close().await;
        self.audio.close().await;
    }

    #[cfg(test)]
    pub async fn is_open(&self, kind: crate::codec::TrackKind) -> bool {
        use crate::codec::TrackKind;

        match kind {
            TrackKind::Video => self.video.is_open().await,
            TrackKind::Audio => self.audio.is_open().await,
        }
    }
}

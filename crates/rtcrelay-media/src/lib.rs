//! Media utilities for rtcrelay
//!
//! This crate provides the media-level pieces the relay needs around the
//! WebRTC engine:
//! - Codec classification (which inbound tracks are video, which are audio)
//! - Recording of published streams to IVF (VP8) and Ogg (Opus) containers

pub mod codec;
pub mod recorder;

pub use codec::*;
pub use recorder::{RecordError, StreamRecorder};

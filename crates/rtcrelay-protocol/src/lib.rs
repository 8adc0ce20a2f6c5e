//! Wire protocol for rtcrelay
//!
//! JSON envelopes exchanged over the signaling (`/ws`) and SFU (`/sfu`) endpoints.

pub mod messages;

pub use messages::*;

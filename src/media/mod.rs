//! Media handling
//!
//! This module provides:
//! - H.264 Annex-B parsing and parameter set handling
//! - SDP building (DESCRIBE) and parsing (upstream)
//! - RTP packetization towards RTSP viewers
//!
//! Payloads are never decoded; only transport framing changes.

pub mod h264;
pub mod rtp;
pub mod sdp;

pub use h264::{AnnexBIterator, NaluType, UnitInfo};
pub use rtp::{H264Packetizer, RTP_MTU};
pub use sdp::{describe_sdp, MediaDescription, SessionDescription};

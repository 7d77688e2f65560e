//! WebRTC consumers
//!
//! A viewer posts an SDP offer over HTTP; the gateway answers it and
//! forwards the channel's access units through a [`WebRtcMuxer`].

pub mod config;
pub mod gateway;
pub mod muxer;

pub use config::WebRtcConfig;
pub use gateway::{track_kinds, WebRtcAnswer, WebRtcGateway};
pub use muxer::WebRtcMuxer;

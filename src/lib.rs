//! RTSP relay
//!
//! Pulls one upstream RTSP connection per channel and re-serves it to any
//! number of viewers over RTSP (interleaved TCP or UDP) and WebRTC.
//!
//! ```text
//!  upstream camera ──► ingest worker ──► Registry::broadcast ──┬──► RTSP writer ──► TCP
//!                      (one per channel)   (drop-oldest queues) └──► WebRTC muxer ──► SRTP
//! ```
//!
//! The [`registry::Registry`] is the only shared mutable state. Inbound
//! protocol handlers register viewers on it and call
//! [`ingest::IngestSupervisor::ensure_running`] to start on-demand workers.

pub mod config;
pub mod error;
pub mod fanout;
pub mod http;
pub mod ingest;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod stats;
pub mod webrtc;

pub use error::{Error, Result};
pub use registry::Registry;
pub use relay::Relay;

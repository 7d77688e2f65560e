//! Upstream source abstraction
//!
//! The worker only needs three things from an upstream: the initial codec
//! set, a stream of events, and a way to hang up. [`UpstreamDialer`] hides
//! whether that is a real RTSP camera or a test double.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::frame::{AccessUnit, CodecDescriptor};

/// Parameters for one upstream connection attempt
#[derive(Debug, Clone)]
pub struct DialRequest {
    /// Channel the connection is for (logging only)
    pub channel: String,
    pub url: String,
    pub disable_audio: bool,
    pub debug: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

/// Something that happened on an upstream connection
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// Codec parameters changed (e.g. in-band SPS/PPS)
    CodecUpdate(Vec<CodecDescriptor>),
    /// A complete access unit
    Unit(AccessUnit),
    /// Upstream ended the RTP stream
    RtpStop,
}

/// A live upstream connection
#[async_trait]
pub trait UpstreamSession: Send {
    /// Codec set known right after setup (may lack parameter sets)
    fn codecs(&self) -> Vec<CodecDescriptor>;

    /// Wait for the next event
    ///
    /// Must be cancel safe: dropping the future before it completes loses
    /// no data and leaves the connection usable.
    async fn next_event(&mut self) -> Result<UpstreamEvent>;

    /// Hang up
    async fn close(&mut self);
}

/// Opens upstream connections
#[async_trait]
pub trait UpstreamDialer: Send + Sync + 'static {
    async fn dial(&self, request: &DialRequest) -> Result<Box<dyn UpstreamSession>>;
}

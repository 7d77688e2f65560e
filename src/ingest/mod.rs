//! Upstream ingest
//!
//! ```text
//! IngestSupervisor --run-lock--> IngestWorker --dial--> UpstreamDialer
//!                                     |                      |
//!                                     |<---- UpstreamEvent ---'
//!                                     v
//!                          drop-oldest buffer -> Registry::broadcast
//! ```
//!
//! [`RtspDialer`] is the production dialer; tests plug in their own.

pub mod config;
pub mod depacketizer;
pub mod rtsp_client;
pub mod source;
pub mod supervisor;
pub mod worker;

pub use config::IngestConfig;
pub use rtsp_client::{RtspDialer, RtspUpstream};
pub use source::{DialRequest, UpstreamDialer, UpstreamEvent, UpstreamSession};
pub use supervisor::IngestSupervisor;
pub use worker::{IngestExit, IngestWorker};

//! Inbound RTSP server
//!
//! ```text
//! RtspServer --accept--> Connection --PLAY--> ViewerWriter
//!      |                     |                     |
//!      '-- idle sweep        '-- SessionTable      '-- viewer queue -> RTP
//! ```

pub mod config;
pub mod connection;
pub mod listener;
pub mod writer;

pub use config::ServerConfig;
pub use connection::{channel_from_uri, Connection, ServerContext};
pub use listener::RtspServer;
pub use writer::{MediaSink, ViewerWriter};

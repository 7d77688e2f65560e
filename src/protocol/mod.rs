//! RTSP wire protocol
//!
//! Shared by the inbound server and the upstream client:
//! - [`message`]: request/response heads and encoding
//! - [`interleaved`]: `$`-framed binary packets and the frame reader
//! - [`transport`]: `Transport`/`Session` header negotiation

pub mod interleaved;
pub mod message;
pub mod transport;

pub use interleaved::{encode_interleaved, Frame, FrameReader};
pub use message::{Headers, Method, RtspRequest, RtspResponse, PUBLIC_METHODS};
pub use transport::{negotiate, Negotiated, TransportMode};

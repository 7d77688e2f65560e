//! Error types
//!
//! Each layer owns a small error enum; `Error` wraps them so `?` works
//! across layer boundaries.

use std::fmt;
use std::io;

pub use crate::registry::error::RegistryError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Socket or file I/O failure
    Io(io::Error),
    /// RTSP wire protocol violation
    Protocol(ProtocolError),
    /// Media parsing failure
    Media(MediaError),
    /// Registry lookup or readiness failure
    Registry(RegistryError),
    /// WebRTC stack failure
    WebRtc(String),
    /// Operation did not finish in time
    Timeout(&'static str),
    /// Configuration rejected
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::WebRtc(msg) => write!(f, "WebRTC error: {}", msg),
            Error::Timeout(what) => write!(f, "Timed out: {}", what),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Media(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtc(e.to_string())
    }
}

/// RTSP protocol errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Request or status line is malformed
    MalformedStartLine(String),
    /// Message head exceeds the buffer limit
    HeadTooLarge(usize),
    /// Declared `Content-Length` exceeds the body limit
    BodyTooLarge(usize),
    /// Upstream answered with a non-success status
    UnexpectedStatus { code: u16, reason: String },
    /// Required header missing from a response
    MissingHeader(&'static str),
    /// URL could not be parsed
    InvalidUrl(String),
    /// Peer closed the connection mid-message
    ConnectionClosed,
    /// Interleaved frame header is invalid
    InvalidInterleaved,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MalformedStartLine(line) => write!(f, "Malformed start line: {}", line),
            ProtocolError::HeadTooLarge(n) => write!(f, "Message head too large: {} bytes", n),
            ProtocolError::BodyTooLarge(n) => write!(f, "Message body too large: {} bytes", n),
            ProtocolError::UnexpectedStatus { code, reason } => {
                write!(f, "Unexpected status: {} {}", code, reason)
            }
            ProtocolError::MissingHeader(name) => write!(f, "Missing header: {}", name),
            ProtocolError::InvalidUrl(url) => write!(f, "Invalid URL: {}", url),
            ProtocolError::ConnectionClosed => write!(f, "Connection closed"),
            ProtocolError::InvalidInterleaved => write!(f, "Invalid interleaved frame"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Media parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// SDP body could not be parsed
    InvalidSdp(String),
    /// H.264 payload is malformed
    InvalidH264Payload,
    /// RTP packet could not be parsed
    InvalidRtpPacket,
    /// Base64 parameter set is malformed
    InvalidParameterSet,
    /// Codec is not carried by this relay
    UnsupportedCodec(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidSdp(msg) => write!(f, "Invalid SDP: {}", msg),
            MediaError::InvalidH264Payload => write!(f, "Invalid H.264 payload"),
            MediaError::InvalidRtpPacket => write!(f, "Invalid RTP packet"),
            MediaError::InvalidParameterSet => write!(f, "Invalid parameter set"),
            MediaError::UnsupportedCodec(name) => write!(f, "Unsupported codec: {}", name),
        }
    }
}

impl std::error::Error for MediaError {}

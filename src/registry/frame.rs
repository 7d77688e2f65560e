//! Media types shared between ingest and consumers
//!
//! Codec descriptors describe each elementary stream of a channel. Access
//! units are the immutable payloads fanned out to viewers.

use bytes::Bytes;

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Codecs carried by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    H264,
    /// G.711 A-law
    Pcma,
    /// G.711 mu-law
    Pcmu,
    Opus,
    /// Any other codec, carried through ingest but skipped by consumers
    Other,
}

impl CodecType {
    /// Map an SDP `rtpmap` encoding name
    pub fn from_encoding_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "H264" => CodecType::H264,
            "PCMA" => CodecType::Pcma,
            "PCMU" => CodecType::Pcmu,
            "OPUS" => CodecType::Opus,
            _ => CodecType::Other,
        }
    }

    /// Infer from a static RTP payload type (RFC 3551)
    pub fn from_static_payload_type(pt: u8) -> Self {
        match pt {
            0 => CodecType::Pcmu,
            8 => CodecType::Pcma,
            _ => CodecType::Other,
        }
    }

    /// Whether WebRTC consumers can forward this codec
    pub fn is_webrtc_compatible(&self) -> bool {
        !matches!(self, CodecType::Other)
    }
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CodecType::H264 => "H264",
            CodecType::Pcma => "PCM_ALAW",
            CodecType::Pcmu => "PCM_MULAW",
            CodecType::Opus => "OPUS",
            CodecType::Other => "OTHER",
        };
        f.write_str(name)
    }
}

/// Parameters of one elementary stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub codec: CodecType,
    pub kind: MediaKind,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Audio channel count (0 for video)
    pub channels: u16,
    /// H.264 sequence parameter set, without start code
    pub sps: Bytes,
    /// H.264 picture parameter set, without start code
    pub pps: Bytes,
}

impl CodecDescriptor {
    /// H.264 video descriptor
    pub fn h264(sps: Bytes, pps: Bytes) -> Self {
        Self {
            codec: CodecType::H264,
            kind: MediaKind::Video,
            clock_rate: 90_000,
            channels: 0,
            sps,
            pps,
        }
    }

    /// Audio descriptor
    pub fn audio(codec: CodecType, clock_rate: u32, channels: u16) -> Self {
        Self {
            codec,
            kind: MediaKind::Audio,
            clock_rate,
            channels,
            sps: Bytes::new(),
            pps: Bytes::new(),
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }

    /// Whether a consumer can start from this descriptor
    ///
    /// H.264 needs both parameter sets; every other codec is ready as-is.
    pub fn is_ready(&self) -> bool {
        match self.codec {
            CodecType::H264 => !self.sps.is_empty() && !self.pps.is_empty(),
            _ => true,
        }
    }
}

/// Whether a codec set contains exactly one stream and it is audio
pub fn is_audio_only(codecs: &[CodecDescriptor]) -> bool {
    codecs.len() == 1 && codecs[0].is_audio()
}

/// One decodable unit of media
///
/// Cheap to clone: the payload is reference counted and never mutated.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// Index into the channel's codec descriptors
    pub stream_index: usize,
    pub kind: MediaKind,
    /// RTP timestamp in the stream's clock rate
    pub timestamp: u32,
    /// Annex-B byte stream for H.264, raw RTP payload for audio
    pub data: Bytes,
    pub is_keyframe: bool,
}

impl AccessUnit {
    pub fn video(stream_index: usize, timestamp: u32, data: Bytes, is_keyframe: bool) -> Self {
        Self {
            stream_index,
            kind: MediaKind::Video,
            timestamp,
            data,
            is_keyframe,
        }
    }

    pub fn audio(stream_index: usize, timestamp: u32, data: Bytes) -> Self {
        Self {
            stream_index,
            kind: MediaKind::Audio,
            timestamp,
            data,
            is_keyframe: false,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

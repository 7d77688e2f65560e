//! RTP framing
//!
//! Packet parsing and serialization come from `webrtc::rtp`; this module
//! adds the relay's packetizer state (sequence numbers, SSRC) and a small
//! RTCP scan for BYE.

use bytes::Bytes;
use webrtc::rtp::codecs::h264::H264Payloader;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Payloader;
use webrtc::util::{Marshal, Unmarshal};

use crate::error::{MediaError, Result};

/// Default MTU for outgoing RTP payloads
pub const RTP_MTU: usize = 1200;

/// RTCP packet type for BYE
const RTCP_BYE: u8 = 203;

/// Parse one RTP packet
pub fn parse_packet(data: &[u8]) -> Result<Packet> {
    let mut buf = data;
    Packet::unmarshal(&mut buf).map_err(|_| MediaError::InvalidRtpPacket.into())
}

/// Whether a (possibly compound) RTCP packet contains a BYE
pub fn rtcp_contains_bye(mut data: &[u8]) -> bool {
    while data.len() >= 4 {
        if data[0] >> 6 != 2 {
            return false;
        }
        if data[1] == RTCP_BYE {
            return true;
        }
        let words = u16::from_be_bytes([data[2], data[3]]) as usize + 1;
        let len = words * 4;
        if len > data.len() {
            return false;
        }
        data = &data[len..];
    }
    false
}

/// Packetizes Annex-B H.264 access units into serialized RTP packets
pub struct H264Packetizer {
    payloader: H264Payloader,
    mtu: usize,
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
}

impl H264Packetizer {
    pub fn new(payload_type: u8, mtu: usize) -> Self {
        Self {
            payloader: H264Payloader::default(),
            mtu,
            payload_type,
            ssrc: rand::random(),
            sequence_number: rand::random(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Split one access unit into RTP packets
    ///
    /// The marker bit is set on the last packet of the unit.
    pub fn packetize(&mut self, timestamp: u32, data: &Bytes) -> Result<Vec<Bytes>> {
        let payloads = self
            .payloader
            .payload(self.mtu, data)
            .map_err(|_| MediaError::InvalidH264Payload)?;

        let last = payloads.len().saturating_sub(1);
        let mut packets = Vec::with_capacity(payloads.len());
        for (idx, payload) in payloads.into_iter().enumerate() {
            let packet = Packet {
                header: Header {
                    version: 2,
                    marker: idx == last,
                    payload_type: self.payload_type,
                    sequence_number: self.sequence_number,
                    timestamp,
                    ssrc: self.ssrc,
                    ..Default::default()
                },
                payload,
            };
            self.sequence_number = self.sequence_number.wrapping_add(1);
            packets.push(packet.marshal().map_err(|_| MediaError::InvalidRtpPacket)?);
        }

        Ok(packets)
    }
}

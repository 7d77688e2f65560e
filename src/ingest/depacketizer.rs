//! RTP to access unit reassembly
//!
//! H.264 payloads (single NAL, STAP-A, FU-A) are unpacked by
//! `webrtc::rtp`'s `H264Packet` into Annex-B and collected until the
//! marker bit or a timestamp change closes the access unit. Audio payloads
//! map one-to-one onto access units.

use bytes::{Bytes, BytesMut};
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Depacketizer;

use crate::media::h264;
use crate::registry::frame::AccessUnit;

/// A completed H.264 access unit
#[derive(Debug, Clone)]
pub struct H264Unit {
    pub unit: AccessUnit,
    /// Set when this unit carried parameter sets different from the last ones
    pub new_parameter_sets: Option<(Bytes, Bytes)>,
}

/// Reassembles H.264 access units for one track
pub struct H264Depacketizer {
    stream_index: usize,
    depacketizer: H264Packet,
    pending: BytesMut,
    pending_timestamp: Option<u32>,
    sps: Bytes,
    pps: Bytes,
}

impl H264Depacketizer {
    /// Start with the parameter sets known from SDP, if any
    pub fn new(stream_index: usize, sps: Bytes, pps: Bytes) -> Self {
        Self {
            stream_index,
            depacketizer: H264Packet::default(),
            pending: BytesMut::new(),
            pending_timestamp: None,
            sps,
            pps,
        }
    }

    /// Feed one RTP packet; returns the access units it completed
    pub fn push(&mut self, packet: &Packet) -> Vec<H264Unit> {
        let mut done = Vec::new();
        let timestamp = packet.header.timestamp;

        if self.pending_timestamp.is_some_and(|ts| ts != timestamp) {
            done.extend(self.flush());
        }

        match self.depacketizer.depacketize(&packet.payload) {
            Ok(data) => {
                if !data.is_empty() {
                    self.pending.extend_from_slice(&data);
                }
                self.pending_timestamp = Some(timestamp);
            }
            Err(e) => {
                tracing::trace!(error = %e, seq = packet.header.sequence_number, "Dropping H.264 packet");
                self.pending.clear();
                self.pending_timestamp = None;
                self.depacketizer = H264Packet::default();
            }
        }

        if packet.header.marker {
            done.extend(self.flush());
        }
        done
    }

    fn flush(&mut self) -> Option<H264Unit> {
        let timestamp = self.pending_timestamp.take()?;
        if self.pending.is_empty() {
            return None;
        }
        let data = self.pending.split().freeze();
        let info = h264::scan_access_unit(&data);

        let mut changed = false;
        if let Some(sps) = info.sps {
            if sps != self.sps {
                self.sps = sps;
                changed = true;
            }
        }
        if let Some(pps) = info.pps {
            if pps != self.pps {
                self.pps = pps;
                changed = true;
            }
        }

        Some(H264Unit {
            unit: AccessUnit::video(self.stream_index, timestamp, data, info.keyframe),
            new_parameter_sets: changed.then(|| (self.sps.clone(), self.pps.clone())),
        })
    }
}

/// One audio access unit per RTP packet
pub fn audio_unit(stream_index: usize, packet: &Packet) -> Option<AccessUnit> {
    if packet.payload.is_empty() {
        return None;
    }
    Some(AccessUnit::audio(
        stream_index,
        packet.header.timestamp,
        packet.payload.clone(),
    ))
}

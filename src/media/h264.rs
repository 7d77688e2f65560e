//! H.264/AVC helpers
//!
//! Access units travel through the relay as Annex-B byte streams:
//! ```text
//! 00 00 00 01 | NAL | 00 00 00 01 | NAL | ...
//! ```
//! NAL header byte:
//! ```text
//! forbidden_zero_bit (1) | nal_ref_idc (2) | nal_unit_type (5)
//! ```
//!
//! Parameter sets reach us either out-of-band through SDP
//! `sprop-parameter-sets` (base64, comma separated) or in-band as SPS/PPS
//! NAL units ahead of IDR slices.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// Annex-B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
    /// RTP single-time aggregation packet
    StapA = 24,
    /// RTP fragmentation unit
    FuA = 28,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            24 => Some(NaluType::StapA),
            28 => Some(NaluType::FuA),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// Iterator over NAL units of an Annex-B byte stream
///
/// Accepts both 3- and 4-byte start codes. Yielded slices exclude the start
/// code. Leading bytes before the first start code are skipped.
pub struct AnnexBIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> AnnexBIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let offset = find_start_code(data, 0).map(|(_, end)| end).unwrap_or(data.len());
        Self { data, offset }
    }
}

impl<'a> Iterator for AnnexBIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset < self.data.len() {
            let start = self.offset;
            let (end, next) = match find_start_code(self.data, start) {
                Some((code_start, code_end)) => (code_start, code_end),
                None => (self.data.len(), self.data.len()),
            };
            self.offset = next;

            if end > start {
                return Some(&self.data[start..end]);
            }
        }
        None
    }
}

/// Locate the next start code at or after `from`; returns (start, end)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                // 00 00 00 01 is reported from its first zero
                let start = if i > from && data[i - 1] == 0 { i - 1 } else { i };
                return Some((start, i + 3));
            }
            if data[i + 2] != 0 {
                i += 3;
                continue;
            }
        }
        i += 1;
    }
    None
}

/// What an access unit contains
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitInfo {
    pub keyframe: bool,
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
}

/// Scan an Annex-B access unit for IDR slices and parameter sets
pub fn scan_access_unit(data: &[u8]) -> UnitInfo {
    let mut info = UnitInfo::default();

    for nal in AnnexBIterator::new(data) {
        match NaluType::from_byte(nal[0]) {
            Some(NaluType::Idr) => info.keyframe = true,
            Some(NaluType::Sps) => info.sps = Some(Bytes::copy_from_slice(nal)),
            Some(NaluType::Pps) => info.pps = Some(Bytes::copy_from_slice(nal)),
            _ => {}
        }
    }

    info
}

/// Prefix a keyframe with SPS/PPS when it does not carry them
pub fn with_parameter_sets(data: &Bytes, sps: &[u8], pps: &[u8]) -> Bytes {
    let info = scan_access_unit(data);
    if !info.keyframe || (info.sps.is_some() && info.pps.is_some()) {
        return data.clone();
    }

    let mut out = BytesMut::with_capacity(data.len() + sps.len() + pps.len() + 8);
    if info.sps.is_none() && !sps.is_empty() {
        out.put_slice(&START_CODE);
        out.put_slice(sps);
    }
    if info.pps.is_none() && !pps.is_empty() {
        out.put_slice(&START_CODE);
        out.put_slice(pps);
    }
    out.put_slice(data);
    out.freeze()
}

/// Decode an SDP `sprop-parameter-sets` value into (SPS, PPS)
pub fn parse_sprop_parameter_sets(value: &str) -> Result<(Bytes, Bytes)> {
    let mut sps = Bytes::new();
    let mut pps = Bytes::new();

    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let nal = STANDARD
            .decode(part)
            .map_err(|_| MediaError::InvalidParameterSet)?;
        if nal.is_empty() {
            return Err(MediaError::InvalidParameterSet.into());
        }
        match NaluType::from_byte(nal[0]) {
            Some(NaluType::Sps) => sps = Bytes::from(nal),
            Some(NaluType::Pps) => pps = Bytes::from(nal),
            _ => {}
        }
    }

    Ok((sps, pps))
}

/// Encode parameter sets for an SDP `sprop-parameter-sets` attribute
pub fn sprop_parameter_sets(sps: &[u8], pps: &[u8]) -> String {
    format!("{},{}", STANDARD.encode(sps), STANDARD.encode(pps))
}

/// Hex `profile-level-id` taken from the three bytes after the SPS header
pub fn profile_level_id(sps: &[u8]) -> Option<String> {
    if sps.len() < 4 {
        return None;
    }
    Some(format!("{:02X}{:02X}{:02X}", sps[1], sps[2], sps[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1F, 0xDA];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
        assert_eq!(NaluType::from_byte(0x7C), Some(NaluType::FuA));
        assert_eq!(NaluType::from_byte(0x78), Some(NaluType::StapA));
        assert!(NaluType::Idr.is_keyframe());
        assert!(NaluType::Sps.is_parameter_set());
    }

    #[test]
    fn test_annex_b_iterator_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS, 4-byte code
            0x00, 0x00, 0x01, 0x68, 0xCE, // PPS, 3-byte code
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // IDR
        ];
        let nals: Vec<&[u8]> = AnnexBIterator::new(&data).collect();
        assert_eq!(nals, vec![&[0x67, 0x42][..], &[0x68, 0xCE][..], &[0x65, 0x88, 0x84][..]]);
    }

    #[test]
    fn test_annex_b_iterator_without_start_code() {
        let data = [0x65, 0x88];
        assert_eq!(AnnexBIterator::new(&data).count(), 0);
        assert_eq!(AnnexBIterator::new(&[]).count(), 0);
    }

    #[test]
    fn test_scan_access_unit() {
        let mut data = Vec::new();
        for nal in [SPS, PPS, &[0x65, 0x88][..]] {
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(nal);
        }

        let info = scan_access_unit(&data);
        assert!(info.keyframe);
        assert_eq!(info.sps.as_deref(), Some(SPS));
        assert_eq!(info.pps.as_deref(), Some(PPS));

        let p_frame = [0x00, 0x00, 0x00, 0x01, 0x41, 0x9A];
        assert_eq!(scan_access_unit(&p_frame), UnitInfo::default());
    }

    #[test]
    fn test_with_parameter_sets_prepends_once() {
        let idr = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88]);
        let out = with_parameter_sets(&idr, SPS, PPS);

        let nals: Vec<&[u8]> = AnnexBIterator::new(&out).collect();
        assert_eq!(nals, vec![SPS, PPS, &[0x65, 0x88][..]]);

        // Already complete: untouched
        assert_eq!(with_parameter_sets(&out, SPS, PPS), out);

        // Non-keyframes are never touched
        let p_frame = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x41, 0x9A]);
        assert_eq!(with_parameter_sets(&p_frame, SPS, PPS), p_frame);
    }

    #[test]
    fn test_sprop_parameter_sets() {
        let encoded = sprop_parameter_sets(SPS, PPS);
        let (sps, pps) = parse_sprop_parameter_sets(&encoded).unwrap();
        assert_eq!(&sps[..], SPS);
        assert_eq!(&pps[..], PPS);

        assert!(parse_sprop_parameter_sets("not base64!").is_err());
        let (sps, pps) = parse_sprop_parameter_sets("").unwrap();
        assert!(sps.is_empty() && pps.is_empty());
    }

    #[test]
    fn test_profile_level_id() {
        assert_eq!(profile_level_id(SPS).as_deref(), Some("42C01F"));
        assert_eq!(profile_level_id(&[0x67]), None);
    }
}

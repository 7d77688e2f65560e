//! SDP building and parsing
//!
//! Only the handful of lines the relay needs: media lines, `rtpmap`,
//! `fmtp` and `control`.

use bytes::Bytes;

use crate::error::{MediaError, Result};
use crate::registry::frame::{CodecDescriptor, CodecType, MediaKind};

use super::h264;

/// Dynamic payload type used for H.264 towards RTSP viewers
pub const H264_PAYLOAD_TYPE: u8 = 96;

/// Control attribute of the single video track we serve
pub const VIDEO_TRACK_CONTROL: &str = "trackID=0";

/// Build the DESCRIBE body served to RTSP viewers
///
/// Always one H.264 video media line. Parameter sets, when known, go into
/// `sprop-parameter-sets` so players can start before the first keyframe.
pub fn describe_sdp(codecs: &[CodecDescriptor]) -> String {
    let mut sdp = String::from(
        "v=0\r\n\
         o=- 0 0 IN IP4 127.0.0.1\r\n\
         s=RTSP Server\r\n\
         t=0 0\r\n",
    );
    sdp.push_str(&format!("m=video 0 RTP/AVP {}\r\n", H264_PAYLOAD_TYPE));
    sdp.push_str(&format!("a=rtpmap:{} H264/90000\r\n", H264_PAYLOAD_TYPE));

    if let Some(video) = codecs.iter().find(|c| c.codec == CodecType::H264 && c.is_ready()) {
        let mut fmtp = String::from("packetization-mode=1");
        if let Some(id) = h264::profile_level_id(&video.sps) {
            fmtp.push_str(&format!(";profile-level-id={}", id));
        }
        fmtp.push_str(&format!(
            ";sprop-parameter-sets={}",
            h264::sprop_parameter_sets(&video.sps, &video.pps)
        ));
        sdp.push_str(&format!("a=fmtp:{} {}\r\n", H264_PAYLOAD_TYPE, fmtp));
    }
    sdp.push_str(&format!("a=control:{}\r\n", VIDEO_TRACK_CONTROL));

    sdp
}

/// One `m=` section of an upstream SDP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub kind: MediaKind,
    pub payload_type: u8,
    pub codec: CodecType,
    pub clock_rate: u32,
    pub channels: u16,
    pub control: Option<String>,
    pub sps: Bytes,
    pub pps: Bytes,
}

impl MediaDescription {
    pub fn descriptor(&self) -> CodecDescriptor {
        match self.kind {
            MediaKind::Video if self.codec == CodecType::H264 => {
                CodecDescriptor::h264(self.sps.clone(), self.pps.clone())
            }
            MediaKind::Video => CodecDescriptor {
                codec: self.codec,
                kind: MediaKind::Video,
                clock_rate: self.clock_rate,
                channels: 0,
                sps: Bytes::new(),
                pps: Bytes::new(),
            },
            MediaKind::Audio => CodecDescriptor::audio(self.codec, self.clock_rate, self.channels),
        }
    }
}

/// Parsed upstream session description
#[derive(Debug, Clone, Default)]
pub struct SessionDescription {
    /// Session-level `a=control`
    pub control: Option<String>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Parse an SDP body
    ///
    /// Media lines other than audio and video are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut session = SessionDescription::default();
        let mut current: Option<MediaDescription> = None;
        let mut skipping = false;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };

            match kind {
                "m" => {
                    if let Some(media) = current.take() {
                        session.media.push(media);
                    }
                    current = parse_media_line(value)?;
                    skipping = current.is_none();
                }
                "a" if skipping => {}
                "a" => {
                    let (name, arg) = value.split_once(':').unwrap_or((value, ""));
                    match current.as_mut() {
                        None if name == "control" => session.control = Some(arg.to_string()),
                        None => {}
                        Some(media) => apply_media_attribute(media, name, arg)?,
                    }
                }
                _ => {}
            }
        }

        if let Some(media) = current.take() {
            session.media.push(media);
        }
        if session.media.is_empty() {
            return Err(MediaError::InvalidSdp("no audio or video media".into()).into());
        }

        Ok(session)
    }
}

fn parse_media_line(value: &str) -> Result<Option<MediaDescription>> {
    let mut fields = value.split_whitespace();
    let kind = match fields.next() {
        Some("video") => MediaKind::Video,
        Some("audio") => MediaKind::Audio,
        Some(_) => return Ok(None),
        None => return Err(MediaError::InvalidSdp(format!("bad media line: {}", value)).into()),
    };

    let payload_type = fields
        .nth(2)
        .and_then(|pt| pt.parse::<u8>().ok())
        .ok_or_else(|| MediaError::InvalidSdp(format!("bad media line: {}", value)))?;

    let (codec, clock_rate, channels) = match CodecType::from_static_payload_type(payload_type) {
        CodecType::Other => (CodecType::Other, 90_000, 0),
        codec => (codec, 8000, 1),
    };

    Ok(Some(MediaDescription {
        kind,
        payload_type,
        codec,
        clock_rate,
        channels,
        control: None,
        sps: Bytes::new(),
        pps: Bytes::new(),
    }))
}

fn apply_media_attribute(media: &mut MediaDescription, name: &str, arg: &str) -> Result<()> {
    match name {
        "control" => media.control = Some(arg.to_string()),
        "rtpmap" => {
            // rtpmap:<pt> <name>/<clock>[/<channels>]
            let Some((pt, encoding)) = arg.split_once(' ') else {
                return Ok(());
            };
            if pt.trim().parse::<u8>().ok() != Some(media.payload_type) {
                return Ok(());
            }
            let mut parts = encoding.trim().split('/');
            media.codec = CodecType::from_encoding_name(parts.next().unwrap_or_default());
            if let Some(rate) = parts.next().and_then(|r| r.parse().ok()) {
                media.clock_rate = rate;
            }
            media.channels = parts.next().and_then(|c| c.parse().ok()).unwrap_or(
                if media.kind == MediaKind::Audio { 1 } else { 0 },
            );
        }
        "fmtp" => {
            let Some((pt, params)) = arg.split_once(' ') else {
                return Ok(());
            };
            if pt.trim().parse::<u8>().ok() != Some(media.payload_type) {
                return Ok(());
            }
            for param in params.split(';') {
                let Some((key, value)) = param.trim().split_once('=') else {
                    continue;
                };
                if key.eq_ignore_ascii_case("sprop-parameter-sets") {
                    // In-band SPS/PPS fill these in later
                    match h264::parse_sprop_parameter_sets(value) {
                        Ok((sps, pps)) => {
                            media.sps = sps;
                            media.pps = pps;
                        }
                        Err(e) => tracing::warn!(error = %e, value = %value, "Ignoring bad sprop-parameter-sets"),
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Resolve a track `control` attribute against the request URL
pub fn resolve_control(base: &str, control: Option<&str>) -> String {
    match control {
        None | Some("") | Some("*") => base.to_string(),
        Some(c) if c.starts_with("rtsp://") || c.starts_with("rtsps://") => c.to_string(),
        Some(c) => format!("{}/{}", base.trim_end_matches('/'), c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_SDP: &str = "v=0\r\n\
        o=- 1 1 IN IP4 10.0.0.5\r\n\
        s=Camera\r\n\
        a=control:*\r\n\
        m=video 0 RTP/AVP 96\r\n\
        a=rtpmap:96 H264/90000\r\n\
        a=fmtp:96 packetization-mode=1;profile-level-id=42C01F;sprop-parameter-sets=Z0LAH9o=,aM48gA==\r\n\
        a=control:trackID=1\r\n\
        m=audio 0 RTP/AVP 8\r\n\
        a=control:trackID=2\r\n\
        m=application 0 RTP/AVP 107\r\n\
        a=control:trackID=3\r\n";

    #[test]
    fn test_parse_camera_sdp() {
        let sdp = SessionDescription::parse(CAMERA_SDP).unwrap();
        assert_eq!(sdp.control.as_deref(), Some("*"));
        assert_eq!(sdp.media.len(), 2);

        let video = &sdp.media[0];
        assert_eq!(video.codec, CodecType::H264);
        assert_eq!(video.clock_rate, 90_000);
        assert_eq!(video.control.as_deref(), Some("trackID=1"));
        assert_eq!(&video.sps[..], &[0x67, 0x42, 0xC0, 0x1F, 0xDA]);
        assert_eq!(&video.pps[..], &[0x68, 0xCE, 0x3C, 0x80]);
        assert!(video.descriptor().is_ready());

        let audio = &sdp.media[1];
        assert_eq!(audio.codec, CodecType::Pcma);
        assert_eq!(audio.clock_rate, 8000);
        assert_eq!(audio.descriptor().kind, MediaKind::Audio);
    }

    #[test]
    fn test_bad_sprop_leaves_parameter_sets_empty() {
        let sdp = SessionDescription::parse(
            "v=0\r\n\
             m=video 0 RTP/AVP 96\r\n\
             a=rtpmap:96 H264/90000\r\n\
             a=fmtp:96 packetization-mode=1;sprop-parameter-sets=%%%,!!\r\n\
             a=control:trackID=0\r\n",
        )
        .unwrap();
        let video = &sdp.media[0];
        assert_eq!(video.codec, CodecType::H264);
        assert_eq!(video.control.as_deref(), Some("trackID=0"));
        assert!(video.sps.is_empty());
        assert!(video.pps.is_empty());
    }

    #[test]
    fn test_parse_opus_rtpmap() {
        let sdp = SessionDescription::parse(
            "v=0\r\nm=audio 0 RTP/AVP 111\r\na=rtpmap:111 opus/48000/2\r\n",
        )
        .unwrap();
        let audio = &sdp.media[0];
        assert_eq!(audio.codec, CodecType::Opus);
        assert_eq!(audio.clock_rate, 48_000);
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(SessionDescription::parse("v=0\r\ns=x\r\n").is_err());
    }

    #[test]
    fn test_describe_sdp_minimal() {
        let sdp = describe_sdp(&[]);
        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(!sdp.contains("a=fmtp"));
    }

    #[test]
    fn test_describe_sdp_carries_parameter_sets() {
        let codecs = vec![CodecDescriptor::h264(
            Bytes::from_static(&[0x67, 0x42, 0xC0, 0x1F, 0xDA]),
            Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80]),
        )];
        let sdp = describe_sdp(&codecs);
        assert!(sdp.contains("profile-level-id=42C01F"));
        assert!(sdp.contains("sprop-parameter-sets=Z0LAH9o=,aM48gA=="));
        assert!(sdp.ends_with("a=control:trackID=0\r\n"));
    }

    #[test]
    fn test_resolve_control() {
        let base = "rtsp://cam/stream";
        assert_eq!(resolve_control(base, None), base);
        assert_eq!(resolve_control(base, Some("*")), base);
        assert_eq!(resolve_control(base, Some("trackID=1")), "rtsp://cam/stream/trackID=1");
        assert_eq!(resolve_control("rtsp://cam/stream/", Some("t1")), "rtsp://cam/stream/t1");
        assert_eq!(
            resolve_control(base, Some("rtsp://other/track")),
            "rtsp://other/track"
        );
    }
}

//! WebRTC muxer
//!
//! Wraps one `RTCPeerConnection` with a sample track per forwarded stream.
//! `write_header` applies the client's offer and returns the answer;
//! `write_packet` feeds access units to the matching track, which handles
//! RTP packetization and SRTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU};
use ::webrtc::api::setting_engine::SettingEngine;
use ::webrtc::api::APIBuilder;
use ::webrtc::ice::mdns::MulticastDnsMode;
use ::webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry as InterceptorRegistry;
use ::webrtc::media::Sample;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use ::webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use ::webrtc::track::track_local::TrackLocal;

use crate::error::{Error, Result};
use crate::media::h264;
use crate::registry::{AccessUnit, CodecDescriptor, CodecType, MediaKind};

use super::config::WebRtcConfig;

const STREAM_ID: &str = "rtsp-relay";

/// Sample duration when no previous timestamp exists or the delta is bogus
const DEFAULT_VIDEO_DURATION: Duration = Duration::from_millis(40);
const DEFAULT_AUDIO_DURATION: Duration = Duration::from_millis(20);

struct MuxTrack {
    track: Arc<TrackLocalStaticSample>,
    kind: MediaKind,
    clock_rate: u32,
    last_timestamp: Option<u32>,
}

impl MuxTrack {
    fn duration_for(&mut self, timestamp: u32) -> Duration {
        let fallback = match self.kind {
            MediaKind::Video => DEFAULT_VIDEO_DURATION,
            MediaKind::Audio => DEFAULT_AUDIO_DURATION,
        };
        let duration = match self.last_timestamp {
            Some(last) => sample_duration(timestamp.wrapping_sub(last), self.clock_rate, fallback),
            None => fallback,
        };
        self.last_timestamp = Some(timestamp);
        duration
    }
}

/// Peer connection plus the tracks feeding it
pub struct WebRtcMuxer {
    config: WebRtcConfig,
    pc: Option<Arc<RTCPeerConnection>>,
    /// Keyed by the channel's stream index
    tracks: HashMap<usize, MuxTrack>,
    sps: Bytes,
    pps: Bytes,
    closed: CancellationToken,
}

impl WebRtcMuxer {
    pub fn new(config: WebRtcConfig) -> Self {
        Self {
            config,
            pc: None,
            tracks: HashMap::new(),
            sps: Bytes::new(),
            pps: Bytes::new(),
            closed: CancellationToken::new(),
        }
    }

    /// Cancelled once the peer connection fails, disconnects or closes
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Create the peer connection for `codecs`, apply the base64 offer and
    /// return the base64 answer
    ///
    /// Streams with codecs WebRTC cannot carry are skipped.
    pub async fn write_header(&mut self, codecs: &[CodecDescriptor], offer: &str) -> Result<String> {
        if self.pc.is_some() {
            return Err(Error::WebRtc("header already written".into()));
        }

        let offer_sdp = decode_offer(offer)?;
        if !codecs.iter().any(|c| codec_capability(c).is_some()) {
            return Err(Error::WebRtc("no WebRTC-compatible tracks".into()));
        }

        let pc = Arc::new(self.new_peer_connection().await?);

        for (index, descriptor) in codecs.iter().enumerate() {
            let Some(capability) = codec_capability(descriptor) else {
                tracing::debug!(codec = %descriptor.codec, "Codec not supported by WebRTC, skipping track");
                continue;
            };

            let track_id = match descriptor.kind {
                MediaKind::Video => "video",
                MediaKind::Audio => "audio",
            };
            let track = Arc::new(TrackLocalStaticSample::new(
                capability,
                format!("{}{}", track_id, index),
                STREAM_ID.to_string(),
            ));

            let sender = pc
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;

            // Drain RTCP so interceptors keep running
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });

            if descriptor.codec == CodecType::H264 {
                self.sps = descriptor.sps.clone();
                self.pps = descriptor.pps.clone();
            }

            self.tracks.insert(
                index,
                MuxTrack {
                    track,
                    kind: descriptor.kind,
                    clock_rate: descriptor.clock_rate,
                    last_timestamp: None,
                },
            );
        }

        let closed = self.closed.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let closed = closed.clone();
            Box::pin(async move {
                tracing::debug!(state = %state, "Peer connection state changed");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Closed
                ) {
                    closed.cancel();
                }
            })
        }));

        // The peer connection is kept even if negotiation fails so close() can release it
        self.pc = Some(Arc::clone(&pc));

        pc.set_remote_description(RTCSessionDescription::offer(offer_sdp)?)
            .await?;
        let answer = pc.create_answer(None).await?;

        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;
        let _ = gathered.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::WebRtc("no local description".into()))?;

        Ok(STANDARD.encode(local.sdp))
    }

    /// Send one access unit on its track
    ///
    /// Units of skipped streams are ignored. Fails once the peer is gone.
    pub async fn write_packet(&mut self, unit: &AccessUnit) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::WebRtc("peer connection closed".into()));
        }

        let data = if unit.kind == MediaKind::Video {
            let info = h264::scan_access_unit(&unit.data);
            if let Some(sps) = info.sps {
                self.sps = sps;
            }
            if let Some(pps) = info.pps {
                self.pps = pps;
            }
            if unit.is_keyframe {
                h264::with_parameter_sets(&unit.data, &self.sps, &self.pps)
            } else {
                unit.data.clone()
            }
        } else {
            unit.data.clone()
        };

        let Some(track) = self.tracks.get_mut(&unit.stream_index) else {
            return Ok(());
        };

        let sample = Sample {
            data,
            duration: track.duration_for(unit.timestamp),
            ..Default::default()
        };
        track.track.write_sample(&sample).await?;
        Ok(())
    }

    /// Close the peer connection
    pub async fn close(&mut self) {
        self.closed.cancel();
        if let Some(pc) = self.pc.take() {
            if let Err(e) = pc.close().await {
                tracing::debug!(error = %e, "Failed to close peer connection");
            }
        }
    }

    async fn new_peer_connection(&self) -> Result<RTCPeerConnection> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let interceptors = register_default_interceptors(InterceptorRegistry::new(), &mut media_engine)?;

        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
        if let Some((min, max)) = self.config.port_range {
            let ephemeral = EphemeralUDP::new(min, max).map_err(|e| Error::WebRtc(e.to_string()))?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
        }

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                username: self.config.ice_username.clone().unwrap_or_default(),
                credential: self.config.ice_credential.clone().unwrap_or_default(),
                ..Default::default()
            }]
        };

        Ok(api
            .new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?)
    }
}

fn decode_offer(offer: &str) -> Result<String> {
    let raw = STANDARD
        .decode(offer.trim())
        .map_err(|_| Error::WebRtc("offer is not valid base64".into()))?;
    String::from_utf8(raw).map_err(|_| Error::WebRtc("offer is not valid UTF-8".into()))
}

/// Track capability for a codec, or `None` when WebRTC cannot carry it
fn codec_capability(descriptor: &CodecDescriptor) -> Option<RTCRtpCodecCapability> {
    let (mime_type, clock_rate, channels, sdp_fmtp_line) = match descriptor.codec {
        CodecType::H264 => (
            MIME_TYPE_H264,
            90_000,
            0,
            "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        ),
        CodecType::Pcma => (MIME_TYPE_PCMA, 8_000, 0, ""),
        CodecType::Pcmu => (MIME_TYPE_PCMU, 8_000, 0, ""),
        CodecType::Opus => (MIME_TYPE_OPUS, 48_000, 2, "minptime=10;useinbandfec=1"),
        CodecType::Other => return None,
    };

    Some(RTCRtpCodecCapability {
        mime_type: mime_type.to_string(),
        clock_rate,
        channels,
        sdp_fmtp_line: sdp_fmtp_line.to_string(),
        rtcp_feedback: vec![],
    })
}

/// Duration of `delta` clock ticks; deltas of zero or over one second use `fallback`
fn sample_duration(delta: u32, clock_rate: u32, fallback: Duration) -> Duration {
    if delta == 0 || clock_rate == 0 || delta > clock_rate {
        return fallback;
    }
    Duration::from_micros(delta as u64 * 1_000_000 / clock_rate as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_capability() {
        let video = codec_capability(&CodecDescriptor::h264(Bytes::new(), Bytes::new())).unwrap();
        assert_eq!(video.mime_type, MIME_TYPE_H264);
        assert_eq!(video.clock_rate, 90_000);

        let pcma = codec_capability(&CodecDescriptor::audio(CodecType::Pcma, 8000, 1)).unwrap();
        assert_eq!(pcma.mime_type, MIME_TYPE_PCMA);

        let opus = codec_capability(&CodecDescriptor::audio(CodecType::Opus, 48000, 2)).unwrap();
        assert_eq!(opus.channels, 2);

        assert!(codec_capability(&CodecDescriptor::audio(CodecType::Other, 44100, 2)).is_none());
    }

    #[test]
    fn test_sample_duration() {
        let fallback = Duration::from_millis(40);
        assert_eq!(sample_duration(3000, 90_000, fallback), Duration::from_micros(33_333));
        assert_eq!(sample_duration(160, 8_000, fallback), Duration::from_millis(20));
        assert_eq!(sample_duration(0, 90_000, fallback), fallback);
        // Wrapped backwards timestamps look like huge deltas
        assert_eq!(sample_duration(u32::MAX - 10, 90_000, fallback), fallback);
    }

    #[test]
    fn test_decode_offer() {
        assert_eq!(decode_offer(&STANDARD.encode("v=0\r\n")).unwrap(), "v=0\r\n");
        assert!(decode_offer("not base64!").is_err());
    }

    #[tokio::test]
    async fn test_write_header_rejects_bad_input() {
        let mut muxer = WebRtcMuxer::new(WebRtcConfig::default());
        let audio = [CodecDescriptor::audio(CodecType::Pcma, 8000, 1)];
        assert!(muxer.write_header(&audio, "%%%").await.is_err());

        let unsupported = [CodecDescriptor::audio(CodecType::Other, 44100, 2)];
        let offer = STANDARD.encode("v=0\r\n");
        assert!(muxer.write_header(&unsupported, &offer).await.is_err());
    }

    #[tokio::test]
    async fn test_write_packet_after_close_fails() {
        let mut muxer = WebRtcMuxer::new(WebRtcConfig::default());
        muxer.close().await;
        let unit = AccessUnit::audio(0, 0, Bytes::from_static(&[0xD5; 160]));
        assert!(muxer.write_packet(&unit).await.is_err());
    }
}

//! WebRTC gateway
//!
//! Answers an SDP offer for a channel, then forwards the channel's fan-out
//! to the peer from a background task until the peer goes away, a write
//! fails or no keyframe arrives within the no-video window.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::fanout::DropOldestQueue;
use crate::ingest::IngestSupervisor;
use crate::registry::{is_audio_only, AccessUnit, ChannelSettings, CodecDescriptor, Registry, RegistryError};

use super::config::WebRtcConfig;
use super::muxer::WebRtcMuxer;

/// Negotiated answer for one viewer
#[derive(Debug, Clone)]
pub struct WebRtcAnswer {
    /// Canonical channel name
    pub channel: String,
    /// Base64 encoded SDP answer
    pub sdp64: String,
    /// "video" or "audio" per forwarded track
    pub tracks: Vec<&'static str>,
}

/// Kinds of the tracks WebRTC viewers receive, in stream order
pub fn track_kinds(codecs: &[CodecDescriptor]) -> Vec<&'static str> {
    codecs
        .iter()
        .filter(|c| c.codec.is_webrtc_compatible())
        .map(|c| if c.is_video() { "video" } else { "audio" })
        .collect()
}

/// Entry point for WebRTC viewers
#[derive(Clone)]
pub struct WebRtcGateway {
    supervisor: IngestSupervisor,
    config: WebRtcConfig,
}

impl WebRtcGateway {
    pub fn new(supervisor: IngestSupervisor, config: WebRtcConfig) -> Self {
        Self { supervisor, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.supervisor.registry()
    }

    pub fn config(&self) -> &WebRtcConfig {
        &self.config
    }

    /// Answer a base64 offer for a configured channel
    pub async fn offer(&self, channel: &str, offer: &str) -> Result<WebRtcAnswer> {
        let registry = self.registry();
        let uuid = registry
            .lookup(channel)
            .await
            .ok_or_else(|| RegistryError::ChannelNotFound(channel.to_string()))?;

        self.supervisor.ensure_running(&uuid).await;
        let codecs = registry.get_codecs(&uuid).await?;

        let mut muxer = WebRtcMuxer::new(self.config.clone());
        let sdp64 = match muxer.write_header(&codecs, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                muxer.close().await;
                return Err(e);
            }
        };

        let forwarder = Forwarder {
            channel: uuid.clone(),
            supervisor: self.supervisor.clone(),
            config: self.config.clone(),
            audio_only: is_audio_only(&codecs),
            muxer,
        };
        tokio::spawn(forwarder.run());

        tracing::info!(channel = %uuid, "WebRTC answer created");

        Ok(WebRtcAnswer {
            channel: uuid,
            sdp64,
            tracks: track_kinds(&codecs),
        })
    }

    /// Answer an offer for an upstream URL, registering it as an on-demand
    /// channel keyed by the URL if needed
    pub async fn offer_url(&self, url: &str, offer: &str) -> Result<WebRtcAnswer> {
        if !self.registry().contains(url).await {
            self.registry()
                .register(url, ChannelSettings::new(url).on_demand(true))
                .await;
        }
        self.offer(url, offer).await
    }
}

/// Drains one viewer into a muxer
struct Forwarder {
    channel: String,
    supervisor: IngestSupervisor,
    config: WebRtcConfig,
    audio_only: bool,
    muxer: WebRtcMuxer,
}

impl Forwarder {
    async fn run(mut self) {
        let registry = Arc::clone(self.supervisor.registry());
        let viewer = match registry.add_viewer(&self.channel).await {
            Ok(viewer) => viewer,
            Err(e) => {
                tracing::debug!(channel = %self.channel, error = %e, "WebRTC viewer not attached");
                self.muxer.close().await;
                return;
            }
        };
        self.supervisor.ensure_running(&self.channel).await;

        let buffer = Arc::new(DropOldestQueue::new(self.config.buffer_capacity));
        let stop = CancellationToken::new();
        let peer_closed = self.muxer.closed();

        let writer = tokio::spawn(write_loop(
            self.muxer,
            Arc::clone(&buffer),
            stop.clone(),
            self.audio_only,
        ));

        let timeout = self.config.no_video_timeout;
        let no_video = tokio::time::sleep(timeout);
        tokio::pin!(no_video);

        let reason = loop {
            tokio::select! {
                _ = stop.cancelled() => break "write failed",
                _ = peer_closed.cancelled() => break "peer closed",
                _ = &mut no_video => break "no video",
                unit = viewer.queue.recv() => match unit {
                    Some(unit) => {
                        if unit.is_keyframe || self.audio_only {
                            no_video.as_mut().reset(Instant::now() + timeout);
                        }
                        buffer.push(unit);
                    }
                    None => break "viewer removed",
                },
            }
        };

        stop.cancel();
        buffer.close();
        registry.remove_viewer(&self.channel, &viewer.id).await;
        let _ = writer.await;

        tracing::info!(channel = %self.channel, viewer = %viewer.id, reason, "WebRTC viewer finished");
    }
}

async fn write_loop(
    mut muxer: WebRtcMuxer,
    buffer: Arc<DropOldestQueue<AccessUnit>>,
    stop: CancellationToken,
    audio_only: bool,
) {
    let mut started = audio_only;

    loop {
        let unit = tokio::select! {
            _ = stop.cancelled() => break,
            unit = buffer.recv() => match unit {
                Some(unit) => unit,
                None => break,
            },
        };

        if unit.is_keyframe {
            started = true;
        }
        if !started {
            continue;
        }

        if let Err(e) = muxer.write_packet(&unit).await {
            tracing::debug!(error = %e, "WebRTC write failed");
            break;
        }
    }

    stop.cancel();
    muxer.close().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;

    use ::webrtc::api::media_engine::MediaEngine;
    use ::webrtc::api::setting_engine::SettingEngine;
    use ::webrtc::api::APIBuilder;
    use ::webrtc::ice::mdns::MulticastDnsMode;
    use ::webrtc::peer_connection::configuration::RTCConfiguration;
    use ::webrtc::peer_connection::RTCPeerConnection;
    use ::webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
    use ::webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use ::webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    use super::*;
    use crate::error::Error;
    use crate::ingest::{DialRequest, IngestConfig, UpstreamDialer, UpstreamSession};
    use crate::registry::{CodecType, RegistryConfig};

    struct RefusingDialer;

    #[async_trait]
    impl UpstreamDialer for RefusingDialer {
        async fn dial(&self, _request: &DialRequest) -> Result<Box<dyn UpstreamSession>> {
            Err(Error::Timeout("refused"))
        }
    }

    fn gateway(registry: Arc<Registry>, no_video: Duration) -> WebRtcGateway {
        let ingest = IngestConfig::default().retry_backoff(Duration::from_millis(20));
        let supervisor = IngestSupervisor::new(registry, Arc::new(RefusingDialer), ingest);
        WebRtcGateway::new(supervisor, WebRtcConfig::default().no_video_timeout(no_video))
    }

    async fn client_offer() -> (RTCPeerConnection, String) {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_setting_engine(setting_engine)
            .build();

        let pc = api.new_peer_connection(RTCConfiguration::default()).await.unwrap();
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.unwrap();
        let _ = gathered.recv().await;
        let sdp = pc.local_description().await.unwrap().sdp;
        (pc, STANDARD.encode(sdp))
    }

    #[test]
    fn test_track_kinds() {
        let codecs = vec![
            CodecDescriptor::h264(Bytes::new(), Bytes::new()),
            CodecDescriptor::audio(CodecType::Other, 44100, 2),
            CodecDescriptor::audio(CodecType::Pcmu, 8000, 1),
        ];
        assert_eq!(track_kinds(&codecs), vec!["video", "audio"]);
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let gateway = gateway(Arc::new(Registry::new()), Duration::from_secs(10));
        let err = gateway.offer("missing", "").await.unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::ChannelNotFound(_))));
    }

    #[tokio::test]
    async fn test_codec_not_ready() {
        let config = RegistryConfig::default().codec_wait(3, Duration::from_millis(10));
        let registry = Arc::new(Registry::with_config(config));
        let gateway = gateway(Arc::clone(&registry), Duration::from_secs(10));

        let err = gateway
            .offer_url("rtsp://cam.local/live", "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::CodecNotReady(_))));

        // The URL became an on-demand channel
        let settings = registry.settings("rtsp://cam.local/live").await.unwrap();
        assert!(settings.on_demand);
    }

    #[tokio::test]
    async fn test_offer_answer_and_no_video_teardown() {
        let registry = Arc::new(Registry::new());
        registry.register("cam1", ChannelSettings::new("rtsp://cam/1")).await;
        registry
            .update_codecs(
                "cam1",
                vec![CodecDescriptor::h264(
                    Bytes::from_static(&[0x67, 0x42, 0xC0, 0x1F]),
                    Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80]),
                )],
            )
            .await;
        let gateway = gateway(Arc::clone(&registry), Duration::from_millis(300));

        let (client, offer) = client_offer().await;
        let answer = gateway.offer("CAM1", &offer).await.unwrap();
        assert_eq!(answer.channel, "cam1");
        assert_eq!(answer.tracks, vec!["video"]);

        let sdp = String::from_utf8(STANDARD.decode(&answer.sdp64).unwrap()).unwrap();
        assert!(sdp.contains("m=video"));
        assert!(sdp.contains("H264"));

        // The forwarder attaches a viewer, then drops it when no keyframe arrives
        let mut attached = false;
        for _ in 0..100 {
            if registry.has_viewers("cam1").await {
                attached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(attached);

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!registry.has_viewers("cam1").await);

        client.close().await.unwrap();
    }
}

//! Codec readiness gate
//!
//! Ingest learns codec parameters asynchronously, while DESCRIBE, SETUP and
//! WebRTC offers need them before they can answer. `get_codecs` bridges the
//! two with a bounded poll: `codec_attempts` checks spaced by
//! `codec_poll_interval`, returning as soon as every descriptor is usable.

use super::error::RegistryError;
use super::frame::CodecDescriptor;
use super::store::Registry;

impl Registry {
    /// Wait for a usable codec set
    ///
    /// H.264 descriptors count as usable only with non-empty SPS and PPS.
    /// Fails with `CodecNotReady` once the attempt budget is spent and with
    /// `ChannelNotFound` if the channel is unknown or disappears.
    pub async fn get_codecs(&self, name: &str) -> Result<Vec<CodecDescriptor>, RegistryError> {
        let attempts = self.config().codec_attempts.max(1);

        for attempt in 0..attempts {
            if let Some(codecs) = self.codecs(name).await? {
                if !codecs.is_empty() && codecs.iter().all(CodecDescriptor::is_ready) {
                    return Ok(codecs);
                }
                tracing::trace!(channel = %name, attempt, "Codec parameters incomplete, waiting");
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.config().codec_poll_interval).await;
            }
        }

        tracing::warn!(channel = %name, attempts, "Codec not ready");
        Err(RegistryError::CodecNotReady(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use bytes::Bytes;

    use crate::registry::frame::CodecType;
    use crate::registry::{ChannelSettings, RegistryConfig};

    use super::*;

    fn ready_h264() -> CodecDescriptor {
        CodecDescriptor::h264(
            Bytes::from_static(&[0x67, 0x42, 0x00, 0x1f]),
            Bytes::from_static(&[0x68, 0xce, 0x3c, 0x80]),
        )
    }

    async fn registry(attempts: u32, interval_ms: u64) -> Registry {
        let config =
            RegistryConfig::default().codec_wait(attempts, Duration::from_millis(interval_ms));
        let registry = Registry::with_config(config);
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;
        registry
    }

    #[tokio::test]
    async fn test_ready_codecs_return_immediately() {
        let registry = registry(100, 50).await;
        registry.update_codecs("cam1", vec![ready_h264()]).await;

        let start = Instant::now();
        let codecs = registry.get_codecs("CAM1").await.unwrap();
        assert_eq!(codecs.len(), 1);
        assert!(start.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_empty_parameter_sets_exhaust_budget() {
        let registry = registry(5, 20).await;
        registry
            .update_codecs("cam1", vec![CodecDescriptor::h264(Bytes::new(), Bytes::new())])
            .await;

        let start = Instant::now();
        let result = registry.get_codecs("cam1").await;
        assert!(matches!(result, Err(RegistryError::CodecNotReady(_))));
        // Four sleeps separate five attempts
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_codecs_arriving_mid_wait() {
        let registry = Arc::new(registry(100, 10).await);

        let writer = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                registry
                    .update_codecs(
                        "cam1",
                        vec![ready_h264(), CodecDescriptor::audio(CodecType::Pcma, 8000, 1)],
                    )
                    .await;
            })
        };

        let codecs = registry.get_codecs("cam1").await.unwrap();
        assert_eq!(codecs.len(), 2);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let registry = registry(3, 1).await;
        assert!(matches!(
            registry.get_codecs("nope").await,
            Err(RegistryError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_audio_only_is_ready_without_parameter_sets() {
        let registry = registry(3, 1).await;
        registry
            .update_codecs("cam1", vec![CodecDescriptor::audio(CodecType::Opus, 48_000, 2)])
            .await;
        assert!(registry.get_codecs("cam1").await.is_ok());
    }
}

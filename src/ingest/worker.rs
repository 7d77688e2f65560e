//! Per-channel ingest worker
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Retrying -> Connecting ...
//!                                 \-> Stopped (on-demand, nobody watching)
//! ```
//!
//! One worker owns the run-lock of its channel for its whole lifetime.
//! Units from upstream go into a drop-oldest buffer; a separate drain task
//! fans them out so a slow registry never stalls the upstream read.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::fanout::DropOldestQueue;
use crate::registry::{is_audio_only, AccessUnit, ChannelSettings, Registry};

use super::config::IngestConfig;
use super::source::{DialRequest, UpstreamDialer, UpstreamEvent, UpstreamSession};

/// Why a streaming session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestExit {
    /// No keyframe within the no-video window
    NoVideoTimeout,
    /// Upstream sent RTCP BYE
    UpstreamRtpStop,
    /// Dial or read failure
    UpstreamUnavailable(String),
    /// On-demand channel lost its last viewer
    NoViewerOnDemand,
    /// Process shutdown
    Shutdown,
}

impl IngestExit {
    /// Failures are recorded on the channel and counted as reconnects
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            IngestExit::NoVideoTimeout
                | IngestExit::UpstreamRtpStop
                | IngestExit::UpstreamUnavailable(_)
        )
    }
}

impl fmt::Display for IngestExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestExit::NoVideoTimeout => write!(f, "no video"),
            IngestExit::UpstreamRtpStop => write!(f, "upstream stopped RTP"),
            IngestExit::UpstreamUnavailable(e) => write!(f, "upstream unavailable: {}", e),
            IngestExit::NoViewerOnDemand => write!(f, "no viewers on on-demand channel"),
            IngestExit::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Worker for one channel
pub struct IngestWorker {
    channel: String,
    settings: ChannelSettings,
    registry: Arc<Registry>,
    dialer: Arc<dyn UpstreamDialer>,
    config: IngestConfig,
    shutdown: CancellationToken,
}

impl IngestWorker {
    /// The caller must already hold the channel's run-lock
    pub fn new(
        channel: String,
        settings: ChannelSettings,
        registry: Arc<Registry>,
        dialer: Arc<dyn UpstreamDialer>,
        config: IngestConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            channel,
            settings,
            registry,
            dialer,
            config,
            shutdown,
        }
    }

    fn log(&self, message: &str) {
        if self.settings.debug {
            tracing::info!(channel = %self.channel, "{}", message);
        } else {
            tracing::debug!(channel = %self.channel, "{}", message);
        }
    }

    /// Run sessions until the channel is no longer needed
    pub async fn run(self) {
        tracing::info!(channel = %self.channel, on_demand = self.settings.on_demand, "Ingest started");
        self.registry.mark_running(&self.channel).await;

        loop {
            let exit = self.run_session().await;

            if exit == IngestExit::Shutdown {
                self.registry.release_run_lock(&self.channel).await;
                tracing::info!(channel = %self.channel, "Ingest stopped on shutdown");
                return;
            }

            if exit.is_failure() {
                tracing::warn!(channel = %self.channel, reason = %exit, "Ingest session failed");
                self.registry.record_error(&self.channel, &exit.to_string()).await;
            } else {
                self.log(&format!("session ended: {}", exit));
            }

            if self.registry.release_if_unwatched(&self.channel).await {
                tracing::info!(channel = %self.channel, "Ingest stopped, no viewers");
                return;
            }

            if exit.is_failure() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        self.registry.release_run_lock(&self.channel).await;
                        return;
                    }
                    _ = sleep(self.config.retry_backoff) => {}
                }
            }
        }
    }

    async fn run_session(&self) -> IngestExit {
        let request = DialRequest {
            channel: self.channel.clone(),
            url: self.settings.url.clone(),
            disable_audio: self.settings.disable_audio,
            debug: self.settings.debug,
            connect_timeout: self.config.connect_timeout,
            read_timeout: self.config.read_timeout,
        };

        let mut session = tokio::select! {
            _ = self.shutdown.cancelled() => return IngestExit::Shutdown,
            dialed = self.dialer.dial(&request) => match dialed {
                Ok(session) => session,
                Err(e) => return IngestExit::UpstreamUnavailable(e.to_string()),
            },
        };

        let codecs = session.codecs();
        let audio_only = is_audio_only(&codecs);
        self.registry.update_codecs(&self.channel, codecs).await;
        self.registry.update_status(&self.channel, true).await;
        self.log("upstream connected");

        let buffer = Arc::new(DropOldestQueue::new(self.config.buffer_capacity));
        let drain = spawn_drain(
            Arc::clone(&self.registry),
            self.channel.clone(),
            Arc::clone(&buffer),
            self.config.viewer_sample_interval,
        );

        let exit = self
            .stream(session.as_mut(), &buffer, audio_only)
            .await;

        buffer.close();
        join_drain(&self.channel, drain).await;
        session.close().await;
        exit
    }

    async fn stream(
        &self,
        session: &mut dyn UpstreamSession,
        buffer: &DropOldestQueue<AccessUnit>,
        audio_only: bool,
    ) -> IngestExit {
        let no_video_timeout = self.config.no_video_timeout;
        let no_video = sleep(no_video_timeout);
        tokio::pin!(no_video);

        let check_every = self.config.viewer_check_interval;
        let mut viewer_check = interval_at(Instant::now() + check_every, check_every);
        let on_demand = self.settings.on_demand;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return IngestExit::Shutdown,
                _ = &mut no_video => return IngestExit::NoVideoTimeout,
                _ = viewer_check.tick(), if on_demand => {
                    if !self.registry.has_viewers(&self.channel).await {
                        return IngestExit::NoViewerOnDemand;
                    }
                }
                event = session.next_event() => match event {
                    Ok(UpstreamEvent::Unit(unit)) => {
                        if unit.is_keyframe || audio_only {
                            no_video.as_mut().reset(Instant::now() + no_video_timeout);
                        }
                        buffer.push(unit);
                    }
                    Ok(UpstreamEvent::CodecUpdate(codecs)) => {
                        self.log("codec update");
                        self.registry.update_codecs(&self.channel, codecs).await;
                    }
                    Ok(UpstreamEvent::RtpStop) => return IngestExit::UpstreamRtpStop,
                    Err(e) => return IngestExit::UpstreamUnavailable(e.to_string()),
                },
            }
        }
    }
}

/// Fan buffered units out and sample the viewer count at most once per interval
fn spawn_drain(
    registry: Arc<Registry>,
    channel: String,
    buffer: Arc<DropOldestQueue<AccessUnit>>,
    sample_interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sample: Option<Instant> = None;
        while let Some(unit) = buffer.recv().await {
            registry.broadcast(&channel, unit).await;

            if last_sample.map_or(true, |t| t.elapsed() >= sample_interval) {
                registry.sample_viewer_count(&channel).await;
                last_sample = Some(Instant::now());
            }
        }
        registry.sample_viewer_count(&channel).await;

        if buffer.dropped() > 0 {
            tracing::debug!(channel = %channel, dropped = buffer.dropped(), "Ingest buffer overflowed");
        }
    })
}

/// Wait for the broadcast task; false if it panicked or was aborted
async fn join_drain(channel: &str, drain: JoinHandle<()>) -> bool {
    match drain.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(channel = %channel, error = %e, "Broadcast task failed");
            false
        }
    }
}

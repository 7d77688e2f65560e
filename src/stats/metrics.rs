//! Status projections of registry state
//!
//! Pure read-only views; the HTTP layer serializes them as JSON.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::{ChannelSnapshot, Registry};

/// Per-channel status
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub uuid: String,
    pub url: String,
    pub rtsp_url: String,
    pub status: bool,
    pub on_demand: bool,
    pub disable_audio: bool,
    pub debug: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub viewer_count: usize,
    pub is_running: bool,
    pub reconnect_count: u64,
}

impl ChannelStatus {
    /// `rtsp_base` is `rtsp://host:port`, without a trailing slash
    pub fn from_snapshot(snapshot: &ChannelSnapshot, rtsp_base: &str) -> Self {
        Self {
            uuid: snapshot.uuid.clone(),
            url: snapshot.settings.url.clone(),
            rtsp_url: format!("{}/{}", rtsp_base, snapshot.uuid),
            status: snapshot.status,
            on_demand: snapshot.settings.on_demand,
            disable_audio: snapshot.settings.disable_audio,
            debug: snapshot.settings.debug,
            last_error: snapshot.last_error.clone(),
            last_updated: snapshot.last_updated,
            viewer_count: snapshot.viewer_count,
            is_running: snapshot.running,
            reconnect_count: snapshot.reconnect_count,
        }
    }
}

/// All channels plus totals
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub streams: Vec<ChannelStatus>,
    pub total: usize,
    /// Channels whose upstream is currently healthy
    pub active_count: usize,
}

impl StatusReport {
    pub async fn collect(registry: &Registry, rtsp_base: &str) -> Self {
        let streams: Vec<ChannelStatus> = registry
            .snapshots()
            .await
            .iter()
            .map(|s| ChannelStatus::from_snapshot(s, rtsp_base))
            .collect();

        Self {
            total: streams.len(),
            active_count: streams.iter().filter(|s| s.status).count(),
            streams,
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    /// Seconds since start
    pub uptime_secs: u64,
    /// Configured channels
    pub stream_count: usize,
    /// Viewers attached across all channels
    pub viewer_count: usize,
    pub last_updated: DateTime<Utc>,
}

impl ServerStats {
    pub async fn collect(registry: &Registry, started_at: Instant) -> Self {
        Self {
            uptime_secs: started_at.elapsed().as_secs(),
            stream_count: registry.channel_count().await,
            viewer_count: registry.total_viewers().await,
            last_updated: Utc::now(),
        }
    }
}

/// Log server totals periodically
pub async fn log_periodically(registry: std::sync::Arc<Registry>, started_at: Instant, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let stats = ServerStats::collect(&registry, started_at).await;
        tracing::info!(
            uptime_secs = stats.uptime_secs,
            streams = stats.stream_count,
            viewers = stats.viewer_count,
            "Server stats"
        );
    }
}

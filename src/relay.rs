//! Process wiring
//!
//! Builds the registry, ingest supervisor, RTSP server and HTTP API from a
//! [`RelayConfig`] and runs them side by side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;

use crate::config::RelayConfig;
use crate::error::Result;
use crate::http::{self, AppState};
use crate::ingest::{IngestConfig, IngestSupervisor, RtspDialer, UpstreamDialer};
use crate::registry::{Registry, RegistryConfig};
use crate::server::{RtspServer, ServerConfig};
use crate::stats::metrics::log_periodically;
use crate::webrtc::WebRtcGateway;

/// How often server totals are logged
const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// The assembled relay
pub struct Relay {
    config: RelayConfig,
    supervisor: IngestSupervisor,
    server_config: ServerConfig,
}

impl Relay {
    /// Relay pulling from real RTSP upstreams
    pub fn new(config: RelayConfig) -> Result<Self> {
        Self::with_dialer(config, RegistryConfig::default(), Arc::new(RtspDialer), IngestConfig::default())
    }

    /// Relay with a custom upstream dialer and tunables
    pub fn with_dialer(
        config: RelayConfig,
        registry_config: RegistryConfig,
        dialer: Arc<dyn UpstreamDialer>,
        ingest: IngestConfig,
    ) -> Result<Self> {
        let server_config = ServerConfig::with_addr(config.rtsp_addr()?);
        let registry = Arc::new(Registry::with_config(registry_config));
        let supervisor = IngestSupervisor::new(registry, dialer, ingest);

        Ok(Self {
            config,
            supervisor,
            server_config,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.supervisor.registry()
    }

    pub fn supervisor(&self) -> &IngestSupervisor {
        &self.supervisor
    }

    /// Bind both listeners and serve until one of them fails
    pub async fn run(self) -> Result<()> {
        let rtsp_listener = TcpListener::bind(self.server_config.bind_addr).await?;
        let http_listener = TcpListener::bind(self.config.http_addr()?).await?;
        self.run_with_listeners(rtsp_listener, http_listener).await
    }

    /// Serve on already bound listeners
    pub async fn run_with_listeners(self, rtsp_listener: TcpListener, http_listener: TcpListener) -> Result<()> {
        let rtsp_port = rtsp_listener.local_addr()?.port();

        self.registry().sync_channels(self.config.channels()).await;
        let started = self.supervisor.start_always_on().await;
        let channels = self.registry().channel_count().await;
        tracing::info!(
            channels,
            always_on = started,
            "Channels loaded"
        );

        let stats = tokio::spawn(log_periodically(
            Arc::clone(self.registry()),
            Instant::now(),
            STATS_INTERVAL,
        ));

        let gateway = WebRtcGateway::new(self.supervisor.clone(), self.config.webrtc_config());
        let state = AppState::new(gateway, self.supervisor.clone(), rtsp_port);
        let server = RtspServer::new(self.server_config.clone(), self.supervisor.clone());

        let result = tokio::select! {
            result = server.run_with_listener(rtsp_listener) => result,
            result = http::serve(http_listener, state) => result.map_err(Into::into),
        };

        stats.abort();
        self.supervisor.shutdown();
        result
    }
}

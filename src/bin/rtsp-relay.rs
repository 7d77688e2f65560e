//! rtsp-relay binary
//!
//! ```bash
//! # Use a config file
//! rtsp-relay --config config/config.json
//!
//! # No config file: serve ad-hoc WebRTC channels only
//! rtsp-relay --listen :8083 --rtsp :5541 --udp-min 50000 --udp-max 50100
//!
//! # Verbose logging
//! RUST_LOG=rtsp_relay=debug rtsp-relay
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rtsp_relay::config::RelayConfig;
use rtsp_relay::Relay;

#[derive(Debug, Parser)]
#[command(name = "rtsp-relay", about = "Relay RTSP cameras to RTSP and WebRTC viewers")]
struct Args {
    /// JSON config file
    #[arg(long, default_value = "config/config.json")]
    config: PathBuf,

    /// HTTP listen address when no config file exists
    #[arg(long, default_value = "8083")]
    listen: String,

    /// RTSP listen address when no config file exists
    #[arg(long, default_value = "5541")]
    rtsp: String,

    /// Lowest WebRTC UDP port when no config file exists
    #[arg(long, default_value_t = 0)]
    udp_min: u16,

    /// Highest WebRTC UDP port when no config file exists
    #[arg(long, default_value_t = 0)]
    udp_max: u16,

    /// ICE server URL when no config file exists
    #[arg(long)]
    ice_server: Option<String>,
}

impl Args {
    fn relay_config(&self) -> Result<RelayConfig> {
        if self.config.exists() {
            return RelayConfig::load(&self.config)
                .with_context(|| format!("Failed to load {}", self.config.display()));
        }

        info!(path = %self.config.display(), "Config file not found, using command line flags");
        let mut config = RelayConfig::default();
        config.server.http_port = self.listen.clone();
        config.server.rtsp_port = self.rtsp.clone();
        config.server.webrtc_port_min = self.udp_min;
        config.server.webrtc_port_max = self.udp_max;
        config.server.ice_servers = self.ice_server.iter().cloned().collect();
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtsp_relay=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.relay_config()?;

    info!(
        http = %config.server.http_port,
        rtsp = %config.server.rtsp_port,
        streams = config.streams.len(),
        "rtsp-relay starting"
    );

    let relay = Relay::new(config).context("Invalid configuration")?;

    tokio::select! {
        result = relay.run() => result.context("Relay stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}

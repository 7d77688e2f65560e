//! Relay configuration file
//!
//! JSON document of the form:
//!
//! ```json
//! {
//!   "server": { "http_port": ":8083", "rtsp_port": ":5541", "ice_servers": [] },
//!   "stream_defaults": { "on_demand": true },
//!   "streams": { "cam1": { "url": "rtsp://10.0.0.5/live" } }
//! }
//! ```
//!
//! Ports may be numbers, `"8083"`, `":8083"` or `"host:8083"`. Stream
//! flags left out fall back to `stream_defaults`.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::registry::ChannelSettings;
use crate::webrtc::WebRtcConfig;

pub const DEFAULT_HTTP_PORT: u16 = 8083;
pub const DEFAULT_RTSP_PORT: u16 = 5541;

/// Whole configuration document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerSection,
    pub stream_defaults: StreamDefaults,
    pub streams: BTreeMap<String, StreamSection>,
    /// External camera directory settings; accepted and ignored
    pub api: serde_json::Value,
}

/// Listener and ICE settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    #[serde(deserialize_with = "listen_addr")]
    pub http_port: String,
    #[serde(deserialize_with = "listen_addr")]
    pub rtsp_port: String,
    pub ice_servers: Vec<String>,
    pub ice_username: String,
    pub ice_credential: String,
    pub webrtc_port_min: u16,
    pub webrtc_port_max: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT.to_string(),
            rtsp_port: DEFAULT_RTSP_PORT.to_string(),
            ice_servers: Vec::new(),
            ice_username: String::new(),
            ice_credential: String::new(),
            webrtc_port_min: 0,
            webrtc_port_max: 0,
        }
    }
}

/// Flags applied to streams that leave them out
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamDefaults {
    pub on_demand: bool,
    pub disable_audio: bool,
    pub debug: bool,
}

/// One configured channel
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    pub url: String,
    #[serde(default)]
    pub on_demand: Option<bool>,
    #[serde(default)]
    pub disable_audio: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
}

/// Accept a port as a number or any string form
fn listen_addr<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Port(u16),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Port(port) => port.to_string(),
        Raw::Text(text) => text,
    })
}

/// Resolve `"8083"`, `":8083"` or `"host:8083"` to a socket address
pub fn parse_listen_addr(value: &str, default_port: u16) -> Result<SocketAddr> {
    let value = value.trim();
    let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

    if value.is_empty() {
        return Ok(SocketAddr::new(any, default_port));
    }
    if let Ok(port) = value.trim_start_matches(':').parse::<u16>() {
        return Ok(SocketAddr::new(any, port));
    }
    value
        .parse::<SocketAddr>()
        .map_err(|_| Error::Config(format!("invalid listen address: {}", value)))
}

impl RelayConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.server.http_port, DEFAULT_HTTP_PORT)
    }

    pub fn rtsp_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.server.rtsp_port, DEFAULT_RTSP_PORT)
    }

    /// Channel definitions with defaults applied, ordered by name
    pub fn channels(&self) -> Vec<(String, ChannelSettings)> {
        let defaults = &self.stream_defaults;
        self.streams
            .iter()
            .map(|(uuid, stream)| {
                let settings = ChannelSettings::new(stream.url.clone())
                    .on_demand(stream.on_demand.unwrap_or(defaults.on_demand))
                    .disable_audio(stream.disable_audio.unwrap_or(defaults.disable_audio))
                    .debug(stream.debug.unwrap_or(defaults.debug));
                (uuid.clone(), settings)
            })
            .collect()
    }

    pub fn webrtc_config(&self) -> WebRtcConfig {
        let server = &self.server;
        let mut config = WebRtcConfig::default()
            .ice_servers(server.ice_servers.clone())
            .port_range(server.webrtc_port_min, server.webrtc_port_max);
        if !server.ice_username.is_empty() || !server.ice_credential.is_empty() {
            config = config.ice_credentials(server.ice_username.clone(), server.ice_credential.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "server": {
            "http_port": ":8083",
            "rtsp_port": 5541,
            "ice_servers": ["stun:stun.l.google.com:19302"],
            "webrtc_port_min": 50000,
            "webrtc_port_max": 50100
        },
        "stream_defaults": { "on_demand": true, "disable_audio": true },
        "api": { "cctv_master_url": "", "retry_interval": 60, "timeout": 5 },
        "streams": {
            "cam1": { "url": "rtsp://10.0.0.5/live" },
            "cam2": { "url": "rtsp://10.0.0.6/live", "on_demand": false, "debug": true }
        }
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = RelayConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.http_addr().unwrap().port(), 8083);
        assert_eq!(config.rtsp_addr().unwrap().port(), 5541);

        let channels = config.channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].0, "cam1");
        assert!(channels[0].1.on_demand);
        assert!(channels[0].1.disable_audio);
        assert!(!channels[1].1.on_demand);
        assert!(channels[1].1.debug);

        let webrtc = config.webrtc_config();
        assert_eq!(webrtc.port_range, Some((50000, 50100)));
        assert_eq!(webrtc.ice_servers.len(), 1);
        assert_eq!(webrtc.ice_username, None);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RelayConfig::from_json("{}").unwrap();
        assert_eq!(config.http_addr().unwrap().port(), DEFAULT_HTTP_PORT);
        assert_eq!(config.rtsp_addr().unwrap().port(), DEFAULT_RTSP_PORT);
        assert!(config.channels().is_empty());
        assert_eq!(config.webrtc_config().port_range, None);
    }

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(parse_listen_addr("8083", 1).unwrap(), "0.0.0.0:8083".parse().unwrap());
        assert_eq!(parse_listen_addr(":8083", 1).unwrap(), "0.0.0.0:8083".parse().unwrap());
        assert_eq!(parse_listen_addr("127.0.0.1:9000", 1).unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(parse_listen_addr("", 5541).unwrap().port(), 5541);
        assert!(parse_listen_addr("nope", 1).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(RelayConfig::from_json("{"), Err(Error::Config(_))));
        assert!(RelayConfig::load("/nonexistent/config.json").is_err());
    }
}

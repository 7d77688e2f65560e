//! WebRTC gateway configuration

use std::time::Duration;

/// ICE settings and forwarder timers
#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    /// STUN/TURN server URLs
    pub ice_servers: Vec<String>,

    /// Username for TURN servers
    pub ice_username: Option<String>,

    /// Credential for TURN servers
    pub ice_credential: Option<String>,

    /// Local UDP port range for ICE candidates; unset means ephemeral ports
    pub port_range: Option<(u16, u16)>,

    /// Viewer is dropped if no keyframe arrives within this window
    pub no_video_timeout: Duration,

    /// Capacity of the drop-oldest stage in front of the muxer
    pub buffer_capacity: usize,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            ice_username: None,
            ice_credential: None,
            port_range: None,
            no_video_timeout: Duration::from_secs(10),
            buffer_capacity: 100,
        }
    }
}

impl WebRtcConfig {
    /// Set the ICE server URLs
    pub fn ice_servers(mut self, servers: Vec<String>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Set TURN credentials
    pub fn ice_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.ice_username = Some(username.into());
        self.ice_credential = Some(credential.into());
        self
    }

    /// Restrict ICE to a UDP port range
    ///
    /// A range with `min` of zero or `min > max` leaves ports ephemeral.
    pub fn port_range(mut self, min: u16, max: u16) -> Self {
        self.port_range = if min == 0 || min > max {
            None
        } else {
            Some((min, max))
        };
        self
    }

    /// Set the no-video window
    pub fn no_video_timeout(mut self, timeout: Duration) -> Self {
        self.no_video_timeout = timeout;
        self
    }

    /// Set the forwarder buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }
}

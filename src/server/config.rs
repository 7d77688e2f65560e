//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::media::RTP_MTU;

/// RTSP listener options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Sessions idle for longer than this are expired
    pub session_idle_timeout: Duration,

    /// How often the idle sweep runs
    pub sweep_interval: Duration,

    /// Disconnect if a client sends nothing for this long
    pub read_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Largest RTP payload sent to viewers
    pub rtp_mtu: usize,

    /// Ports advertised as `server_port` for UDP sessions
    pub udp_server_ports: (u16, u16),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5541)),
            max_connections: 0, // Unlimited
            session_idle_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            tcp_nodelay: true,
            rtp_mtu: RTP_MTU,
            udp_server_ports: (5000, 5001),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the session idle timeout and sweep interval
    pub fn session_idle(mut self, timeout: Duration, sweep_interval: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self.sweep_interval = sweep_interval;
        self
    }

    /// Set the client read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the RTP payload size, never below 100 bytes
    pub fn rtp_mtu(mut self, mtu: usize) -> Self {
        self.rtp_mtu = mtu.max(100);
        self
    }

    /// Set the advertised UDP server ports
    pub fn udp_server_ports(mut self, rtp: u16, rtcp: u16) -> Self {
        self.udp_server_ports = (rtp, rtcp);
        self
    }
}

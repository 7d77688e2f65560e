//! RTSP session state
//!
//! Tracks one RTSP session from SETUP (or an implicit PLAY) to TEARDOWN or
//! idle expiry.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::protocol::Negotiated;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// SETUP answered, not playing yet
    Ready,
    /// PLAY answered, a writer is running
    Playing,
}

/// Complete session state
#[derive(Debug, Clone)]
pub struct RtspSession {
    /// Value of the `Session` header
    pub id: String,

    /// Canonical channel uuid
    pub channel: String,

    /// Connection that created the session
    pub connection_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Negotiated media path
    pub transport: Negotiated,

    pub phase: SessionPhase,

    /// Viewer registered at PLAY
    pub viewer_id: Option<String>,

    pub created_at: Instant,

    /// Last request or frame seen on the owning connection
    pub last_active: Instant,

    /// Cancelled on TEARDOWN or expiry; stops the writer
    pub cancel: CancellationToken,
}

impl RtspSession {
    pub fn new(
        channel: String,
        connection_id: u64,
        peer_addr: SocketAddr,
        transport: Negotiated,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: new_session_id(),
            channel,
            connection_id,
            peer_addr,
            transport,
            phase: SessionPhase::Ready,
            viewer_id: None,
            created_at: now,
            last_active: now,
            cancel: CancellationToken::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Attach the viewer and move to `Playing`
    pub fn start_playing(&mut self, viewer_id: String) {
        self.viewer_id = Some(viewer_id);
        self.phase = SessionPhase::Playing;
    }

    pub fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_active.elapsed() > idle_timeout
    }

    /// `Session` header value advertising the idle timeout
    pub fn header_value(&self, idle_timeout: Duration) -> String {
        format!("{};timeout={}", self.id, idle_timeout.as_secs())
    }
}

/// Random 16-digit upper-case hex session id
pub fn new_session_id() -> String {
    format!("{:016X}", rand::random::<u64>())
}

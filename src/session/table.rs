//! Live RTSP sessions shared by all connections and the idle sweep

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::registry::Registry;

use super::state::RtspSession;

/// Sessions keyed by id
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, RtspSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: RtspSession) {
        self.sessions.lock().insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<RtspSession> {
        self.sessions.lock().get(id).cloned()
    }

    /// Refresh the activity timestamp; false if the session is gone
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.lock().get_mut(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Record the viewer registered at PLAY
    pub fn start_playing(&self, id: &str, viewer_id: String) -> bool {
        match self.sessions.lock().get_mut(id) {
            Some(session) => {
                session.touch();
                session.start_playing(viewer_id);
                true
            }
            None => false,
        }
    }

    /// Remove and cancel a session
    pub fn remove(&self, id: &str) -> Option<RtspSession> {
        let session = self.sessions.lock().remove(id)?;
        session.cancel.cancel();
        Some(session)
    }

    /// Remove and cancel every session idle for longer than `idle_timeout`
    pub fn sweep(&self, idle_timeout: Duration) -> Vec<RtspSession> {
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.is_idle(idle_timeout))
            .map(|s| s.id.clone())
            .collect();

        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .inspect(|s| s.cancel.cancel())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// Expire idle sessions and detach their viewers
pub async fn expire_idle(table: &SessionTable, registry: &Registry, idle_timeout: Duration) -> usize {
    let expired = table.sweep(idle_timeout);
    for session in &expired {
        tracing::info!(
            session_id = %session.id,
            channel = %session.channel,
            peer = %session.peer_addr,
            "Session expired"
        );
        if let Some(viewer_id) = &session.viewer_id {
            registry.remove_viewer(&session.channel, viewer_id).await;
        }
    }
    expired.len()
}

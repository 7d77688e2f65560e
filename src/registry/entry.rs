//! Channel entry and state types
//!
//! This module defines the per-channel state stored in the registry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::fanout::Viewer;

use super::frame::CodecDescriptor;

/// Static definition of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Upstream RTSP URL
    pub url: String,
    /// Only connect upstream while viewers are attached
    pub on_demand: bool,
    /// Do not set up upstream audio tracks
    pub disable_audio: bool,
    /// Verbose ingest logging for this channel
    pub debug: bool,
}

impl ChannelSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            on_demand: false,
            disable_audio: false,
            debug: false,
        }
    }

    pub fn on_demand(mut self, on_demand: bool) -> Self {
        self.on_demand = on_demand;
        self
    }

    pub fn disable_audio(mut self, disable: bool) -> Self {
        self.disable_audio = disable;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Entry for a single channel in the registry
pub struct ChannelEntry {
    /// Canonical identifier, case preserved
    pub uuid: String,

    pub settings: ChannelSettings,

    /// Set while an ingest worker owns this channel
    pub run_lock: bool,

    /// Worker loop is alive
    pub running: bool,

    /// Upstream is currently delivering
    pub status: bool,

    /// Last codec set reported by ingest
    pub codecs: Option<Vec<CodecDescriptor>>,

    pub last_error: Option<String>,

    pub last_updated: DateTime<Utc>,

    pub reconnect_count: u64,

    /// Viewer count as last sampled by the worker
    pub viewer_count: usize,

    /// Attached viewers by id
    pub viewers: HashMap<String, Viewer>,
}

impl ChannelEntry {
    pub(super) fn new(uuid: String, settings: ChannelSettings) -> Self {
        Self {
            uuid,
            settings,
            run_lock: false,
            running: false,
            status: false,
            codecs: None,
            last_error: None,
            last_updated: Utc::now(),
            reconnect_count: 0,
            viewer_count: 0,
            viewers: HashMap::new(),
        }
    }

    /// Carry live state over from a previous entry with the same uuid
    pub(super) fn inherit_live_state(&mut self, previous: ChannelEntry) {
        self.run_lock = previous.run_lock;
        self.running = previous.running;
        self.status = previous.status;
        self.codecs = previous.codecs;
        self.last_error = previous.last_error;
        self.last_updated = previous.last_updated;
        self.reconnect_count = previous.reconnect_count;
        self.viewer_count = previous.viewer_count;
        self.viewers = previous.viewers;
    }

    pub fn has_viewers(&self) -> bool {
        !self.viewers.is_empty()
    }

    pub(super) fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// Point-in-time view of a channel, safe to hand out of the lock
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub uuid: String,
    pub settings: ChannelSettings,
    pub running: bool,
    pub status: bool,
    pub codecs: Option<Vec<CodecDescriptor>>,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub reconnect_count: u64,
    pub viewer_count: usize,
    pub attached_viewers: usize,
}

impl From<&ChannelEntry> for ChannelSnapshot {
    fn from(entry: &ChannelEntry) -> Self {
        Self {
            uuid: entry.uuid.clone(),
            settings: entry.settings.clone(),
            running: entry.running,
            status: entry.status,
            codecs: entry.codecs.clone(),
            last_error: entry.last_error.clone(),
            last_updated: entry.last_updated,
            reconnect_count: entry.reconnect_count,
            viewer_count: entry.viewer_count,
            attached_viewers: entry.viewers.len(),
        }
    }
}

//! Channel registry implementation
//!
//! The central registry that owns every channel definition, its live state
//! and its attached viewers, and routes access units from ingest to viewers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::config::RegistryConfig;
use super::entry::{ChannelEntry, ChannelSettings, ChannelSnapshot};
use super::error::RegistryError;
use super::frame::{AccessUnit, CodecDescriptor};
use crate::fanout::{Viewer, ViewerQueue};

#[derive(Default)]
struct ChannelMap {
    entries: HashMap<String, ChannelEntry>,
    /// Lower-cased name to canonical uuid
    by_lower: HashMap<String, String>,
}

impl ChannelMap {
    fn canonical(&self, name: &str) -> Option<&String> {
        self.by_lower.get(&name.to_lowercase())
    }

    fn get(&self, name: &str) -> Option<&ChannelEntry> {
        self.canonical(name).and_then(|uuid| self.entries.get(uuid))
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut ChannelEntry> {
        let uuid = self.by_lower.get(&name.to_lowercase())?;
        self.entries.get_mut(uuid)
    }
}

/// Central registry for all channels
///
/// One `RwLock` guards the whole map. Mutations happen on state transitions
/// and viewer attach/detach, never per packet, and no lock is held across I/O.
pub struct Registry {
    channels: RwLock<ChannelMap>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            channels: RwLock::new(ChannelMap::default()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a channel
    ///
    /// Returns `false` without touching anything if a channel with the same
    /// name in any casing already exists.
    pub async fn register(&self, uuid: &str, settings: ChannelSettings) -> bool {
        let mut channels = self.channels.write().await;

        if let Some(existing) = channels.canonical(uuid) {
            tracing::warn!(
                channel = %uuid,
                existing = %existing,
                "Channel already registered, ignoring"
            );
            return false;
        }

        channels
            .by_lower
            .insert(uuid.to_lowercase(), uuid.to_string());
        channels
            .entries
            .insert(uuid.to_string(), ChannelEntry::new(uuid.to_string(), settings));

        tracing::info!(channel = %uuid, "Channel registered");
        true
    }

    /// Replace the channel set
    ///
    /// Channels whose name matches an existing one (in any casing) keep their
    /// live state: run-lock, codecs, counters and viewers. Viewers of dropped
    /// channels have their queues closed.
    pub async fn sync_channels(&self, definitions: Vec<(String, ChannelSettings)>) {
        let mut channels = self.channels.write().await;
        let mut previous = std::mem::take(&mut *channels);

        for (uuid, settings) in definitions {
            let lower = uuid.to_lowercase();
            if channels.by_lower.contains_key(&lower) {
                tracing::warn!(channel = %uuid, "Duplicate channel in sync, ignoring");
                continue;
            }

            let mut entry = ChannelEntry::new(uuid.clone(), settings);
            if let Some(old_uuid) = previous.by_lower.remove(&lower) {
                if let Some(old) = previous.entries.remove(&old_uuid) {
                    entry.inherit_live_state(old);
                }
            }

            channels.by_lower.insert(lower, uuid.clone());
            channels.entries.insert(uuid, entry);
        }

        for (uuid, entry) in previous.entries {
            for viewer in entry.viewers.values() {
                viewer.queue.close();
            }
            tracing::info!(channel = %uuid, "Channel removed by sync");
        }
    }

    /// Resolve a name to its canonical uuid, ignoring case
    pub async fn lookup(&self, name: &str) -> Option<String> {
        self.channels.read().await.canonical(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.lookup(name).await.is_some()
    }

    /// Get a channel's static settings
    pub async fn settings(&self, name: &str) -> Option<ChannelSettings> {
        self.channels
            .read()
            .await
            .get(name)
            .map(|entry| entry.settings.clone())
    }

    /// Take the run-lock of an on-demand channel that is not running
    ///
    /// Check and set happen under one write lock, so concurrent callers
    /// see exactly one winner.
    pub async fn acquire_on_demand_run_lock(
        &self,
        name: &str,
    ) -> Option<(String, ChannelSettings)> {
        let mut channels = self.channels.write().await;
        let entry = channels.get_mut(name)?;

        if !entry.settings.on_demand || entry.run_lock {
            return None;
        }
        entry.run_lock = true;
        Some((entry.uuid.clone(), entry.settings.clone()))
    }

    /// Take the run-lock of any channel that is not running
    pub async fn acquire_run_lock(&self, name: &str) -> Option<(String, ChannelSettings)> {
        let mut channels = self.channels.write().await;
        let entry = channels.get_mut(name)?;

        if entry.run_lock {
            return None;
        }
        entry.run_lock = true;
        Some((entry.uuid.clone(), entry.settings.clone()))
    }

    /// Release the run-lock on worker exit
    ///
    /// Idempotent. Also clears the running and status flags.
    pub async fn release_run_lock(&self, name: &str) {
        let mut channels = self.channels.write().await;

        if let Some(entry) = channels.get_mut(name) {
            entry.run_lock = false;
            entry.running = false;
            entry.status = false;
            entry.touch();
        }
    }

    /// Release the run-lock if nobody needs the worker any more
    ///
    /// True when the channel is on-demand with no viewers, or has been removed.
    /// The viewer check and the release share one write lock, so a viewer
    /// attaching concurrently either keeps this worker alive or finds the
    /// lock free and starts a new one.
    pub async fn release_if_unwatched(&self, name: &str) -> bool {
        let mut channels = self.channels.write().await;

        match channels.get_mut(name) {
            None => true,
            Some(entry) if entry.settings.on_demand && !entry.has_viewers() => {
                entry.run_lock = false;
                entry.running = false;
                entry.status = false;
                entry.touch();
                true
            }
            Some(_) => false,
        }
    }

    /// Mark the worker loop alive
    pub async fn mark_running(&self, name: &str) {
        let mut channels = self.channels.write().await;

        if let Some(entry) = channels.get_mut(name) {
            entry.running = true;
            entry.status = true;
            entry.touch();
        }
    }

    pub async fn update_status(&self, name: &str, status: bool) {
        let mut channels = self.channels.write().await;

        if let Some(entry) = channels.get_mut(name) {
            entry.status = status;
            entry.touch();
        }
    }

    /// Record an ingest failure and count the reconnect it causes
    pub async fn record_error(&self, name: &str, error: &str) {
        let mut channels = self.channels.write().await;

        if let Some(entry) = channels.get_mut(name) {
            entry.last_error = Some(error.to_string());
            entry.status = false;
            entry.reconnect_count += 1;
            entry.touch();
        }
    }

    pub async fn has_viewers(&self, name: &str) -> bool {
        self.channels
            .read()
            .await
            .get(name)
            .map(|entry| entry.has_viewers())
            .unwrap_or(false)
    }

    /// Store the codec set reported by ingest
    pub async fn update_codecs(&self, name: &str, codecs: Vec<CodecDescriptor>) {
        let mut channels = self.channels.write().await;

        if let Some(entry) = channels.get_mut(name) {
            tracing::debug!(channel = %entry.uuid, streams = codecs.len(), "Codecs updated");
            entry.codecs = Some(codecs);
        }
    }

    /// Current codec set without waiting
    pub async fn codecs(&self, name: &str) -> Result<Option<Vec<CodecDescriptor>>, RegistryError> {
        self.channels
            .read()
            .await
            .get(name)
            .map(|entry| entry.codecs.clone())
            .ok_or_else(|| RegistryError::ChannelNotFound(name.to_string()))
    }

    /// Attach a viewer with a fresh id and queue
    pub async fn add_viewer(&self, name: &str) -> Result<Viewer, RegistryError> {
        let mut channels = self.channels.write().await;
        let entry = channels
            .get_mut(name)
            .ok_or_else(|| RegistryError::ChannelNotFound(name.to_string()))?;

        let viewer = Viewer::new(self.config.viewer_queue_capacity);
        entry.viewers.insert(viewer.id.clone(), viewer.clone());

        tracing::info!(
            channel = %entry.uuid,
            viewer = %viewer.id,
            viewers = entry.viewers.len(),
            "Viewer added"
        );

        Ok(viewer)
    }

    /// Detach a viewer and close its queue
    pub async fn remove_viewer(&self, name: &str, viewer_id: &str) -> bool {
        let mut channels = self.channels.write().await;

        let Some(entry) = channels.get_mut(name) else {
            return false;
        };
        match entry.viewers.remove(viewer_id) {
            Some(viewer) => {
                viewer.queue.close();
                tracing::info!(
                    channel = %entry.uuid,
                    viewer = %viewer_id,
                    viewers = entry.viewers.len(),
                    "Viewer removed"
                );
                true
            }
            None => false,
        }
    }

    /// Broadcast an access unit to every viewer of a channel
    ///
    /// The viewer set is snapshotted under the read lock; pushes happen after
    /// it is released and never wait.
    pub async fn broadcast(&self, name: &str, unit: AccessUnit) -> usize {
        let queues: Vec<Arc<ViewerQueue>> = {
            let channels = self.channels.read().await;
            match channels.get(name) {
                Some(entry) => entry.viewers.values().map(|v| Arc::clone(&v.queue)).collect(),
                None => return 0,
            }
        };

        for queue in &queues {
            queue.push(unit.clone());
        }
        queues.len()
    }

    /// Refresh the sampled viewer count from the live viewer set
    pub async fn sample_viewer_count(&self, name: &str) -> usize {
        let mut channels = self.channels.write().await;

        match channels.get_mut(name) {
            Some(entry) => {
                entry.viewer_count = entry.viewers.len();
                entry.viewer_count
            }
            None => 0,
        }
    }

    pub async fn snapshot(&self, name: &str) -> Option<ChannelSnapshot> {
        self.channels.read().await.get(name).map(ChannelSnapshot::from)
    }

    /// Snapshots of all channels, ordered by uuid
    pub async fn snapshots(&self) -> Vec<ChannelSnapshot> {
        let channels = self.channels.read().await;
        let mut all: Vec<ChannelSnapshot> =
            channels.entries.values().map(ChannelSnapshot::from).collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        all
    }

    /// Canonical uuids of all channels
    pub async fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.read().await.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.entries.len()
    }

    /// Viewers attached across all channels
    pub async fn total_viewers(&self) -> usize {
        self.channels
            .read()
            .await
            .entries
            .values()
            .map(|entry| entry.viewers.len())
            .sum()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn unit(ts: u32) -> AccessUnit {
        AccessUnit::video(0, ts, Bytes::from_static(&[0, 0, 0, 1, 0x65]), true)
    }

    #[tokio::test]
    async fn test_case_insensitive_registration() {
        let registry = Registry::new();

        assert!(registry.register("Cam1", ChannelSettings::new("rtsp://a")).await);
        assert!(!registry.register("cam1", ChannelSettings::new("rtsp://b")).await);

        assert_eq!(registry.channel_count().await, 1);
        assert_eq!(registry.lookup("CAM1").await.as_deref(), Some("Cam1"));
        assert_eq!(registry.lookup("cam1").await.as_deref(), Some("Cam1"));
        assert_eq!(registry.settings("cAm1").await.unwrap().url, "rtsp://a");
        assert!(registry.lookup("cam2").await.is_none());
    }

    #[tokio::test]
    async fn test_on_demand_run_lock_single_winner() {
        let registry = Arc::new(Registry::new());
        registry
            .register("cam1", ChannelSettings::new("rtsp://a").on_demand(true))
            .await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.acquire_on_demand_run_lock("CAM1").await.is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        registry.release_run_lock("cam1").await;
        registry.release_run_lock("cam1").await;
        assert!(registry.acquire_on_demand_run_lock("cam1").await.is_some());
    }

    #[tokio::test]
    async fn test_always_on_channel_is_not_started_on_demand() {
        let registry = Registry::new();
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;

        assert!(registry.acquire_on_demand_run_lock("cam1").await.is_none());
        assert!(registry.acquire_run_lock("cam1").await.is_some());
        assert!(registry.acquire_run_lock("cam1").await.is_none());
    }

    #[tokio::test]
    async fn test_release_if_unwatched() {
        let registry = Registry::new();
        registry
            .register("cam1", ChannelSettings::new("rtsp://a").on_demand(true))
            .await;
        registry.acquire_on_demand_run_lock("cam1").await.unwrap();
        registry.mark_running("cam1").await;

        let viewer = registry.add_viewer("cam1").await.unwrap();
        assert!(!registry.release_if_unwatched("cam1").await);
        assert!(registry.snapshot("cam1").await.unwrap().running);

        registry.remove_viewer("cam1", &viewer.id).await;
        assert!(registry.release_if_unwatched("cam1").await);

        let snapshot = registry.snapshot("cam1").await.unwrap();
        assert!(!snapshot.running);
        assert!(!snapshot.status);
        assert!(registry.acquire_on_demand_run_lock("cam1").await.is_some());
    }

    #[tokio::test]
    async fn test_release_if_unwatched_keeps_always_on() {
        let registry = Registry::new();
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;
        assert!(!registry.release_if_unwatched("cam1").await);
        assert!(registry.release_if_unwatched("gone").await);
    }

    #[tokio::test]
    async fn test_viewer_add_remove() {
        let registry = Registry::new();
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;

        let a = registry.add_viewer("cam1").await.unwrap();
        let b = registry.add_viewer("CAM1").await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(registry.has_viewers("cam1").await);
        assert_eq!(registry.total_viewers().await, 2);

        assert!(registry.remove_viewer("cam1", &a.id).await);
        assert!(!registry.remove_viewer("cam1", &a.id).await);
        assert!(a.queue.is_closed());
        assert!(!b.queue.is_closed());

        assert!(matches!(
            registry.add_viewer("missing").await,
            Err(RegistryError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_viewer() {
        let registry = Registry::new();
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;
        let a = registry.add_viewer("cam1").await.unwrap();
        let b = registry.add_viewer("cam1").await.unwrap();

        assert_eq!(registry.broadcast("cam1", unit(1)).await, 2);
        assert_eq!(registry.broadcast("missing", unit(2)).await, 0);

        assert_eq!(a.queue.try_recv().unwrap().timestamp, 1);
        assert_eq!(b.queue.try_recv().unwrap().timestamp, 1);
    }

    #[tokio::test]
    async fn test_slow_viewer_keeps_most_recent() {
        let config = RegistryConfig::default().viewer_queue_capacity(5);
        let registry = Registry::with_config(config);
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;
        let viewer = registry.add_viewer("cam1").await.unwrap();

        for ts in 0..50 {
            registry.broadcast("cam1", unit(ts)).await;
        }

        assert_eq!(viewer.queue.len(), 5);
        let received: Vec<u32> = std::iter::from_fn(|| viewer.queue.try_recv())
            .map(|u| u.timestamp)
            .collect();
        assert_eq!(received, vec![45, 46, 47, 48, 49]);
    }

    #[tokio::test]
    async fn test_record_error_counts_reconnects() {
        let registry = Registry::new();
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;
        registry.mark_running("cam1").await;

        registry.record_error("cam1", "connection refused").await;
        registry.record_error("cam1", "connection refused").await;

        let snapshot = registry.snapshot("cam1").await.unwrap();
        assert_eq!(snapshot.reconnect_count, 2);
        assert!(!snapshot.status);
        assert!(snapshot.running);
        assert_eq!(snapshot.last_error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_sync_preserves_live_state() {
        let registry = Registry::new();
        registry
            .register("Cam1", ChannelSettings::new("rtsp://old").on_demand(true))
            .await;
        registry.register("cam2", ChannelSettings::new("rtsp://two")).await;
        registry.acquire_on_demand_run_lock("cam1").await.unwrap();
        let kept = registry.add_viewer("cam1").await.unwrap();
        let dropped = registry.add_viewer("cam2").await.unwrap();
        registry.record_error("cam1", "boom").await;

        registry
            .sync_channels(vec![
                ("CAM1".to_string(), ChannelSettings::new("rtsp://new").on_demand(true)),
                ("cam3".to_string(), ChannelSettings::new("rtsp://three")),
            ])
            .await;

        assert_eq!(registry.channel_ids().await, vec!["CAM1", "cam3"]);
        let snapshot = registry.snapshot("cam1").await.unwrap();
        assert_eq!(snapshot.settings.url, "rtsp://new");
        assert_eq!(snapshot.reconnect_count, 1);
        assert_eq!(snapshot.attached_viewers, 1);
        assert!(registry.acquire_on_demand_run_lock("cam1").await.is_none());
        assert!(!kept.queue.is_closed());
        assert!(dropped.queue.is_closed());
    }

    #[tokio::test]
    async fn test_sample_viewer_count() {
        let registry = Registry::new();
        registry.register("cam1", ChannelSettings::new("rtsp://a")).await;
        let _a = registry.add_viewer("cam1").await.unwrap();

        assert_eq!(registry.snapshot("cam1").await.unwrap().viewer_count, 0);
        assert_eq!(registry.sample_viewer_count("cam1").await, 1);
        assert_eq!(registry.snapshot("cam1").await.unwrap().viewer_count, 1);
    }
}

//! Starts ingest workers under the registry's run-lock

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::registry::{ChannelSettings, Registry};

use super::config::IngestConfig;
use super::source::UpstreamDialer;
use super::worker::IngestWorker;

/// Spawns at most one worker per channel
#[derive(Clone)]
pub struct IngestSupervisor {
    registry: Arc<Registry>,
    dialer: Arc<dyn UpstreamDialer>,
    config: IngestConfig,
    shutdown: CancellationToken,
}

impl IngestSupervisor {
    pub fn new(registry: Arc<Registry>, dialer: Arc<dyn UpstreamDialer>, config: IngestConfig) -> Self {
        Self {
            registry,
            dialer,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Start the worker of an on-demand channel if it is not running
    ///
    /// Returns true when this call started it. Always-on channels are
    /// started at boot and are left alone here.
    pub async fn ensure_running(&self, name: &str) -> bool {
        match self.registry.acquire_on_demand_run_lock(name).await {
            Some((uuid, settings)) => {
                self.spawn(uuid, settings);
                true
            }
            None => false,
        }
    }

    /// Start the worker of any channel that is not running
    pub async fn start(&self, name: &str) -> bool {
        match self.registry.acquire_run_lock(name).await {
            Some((uuid, settings)) => {
                self.spawn(uuid, settings);
                true
            }
            None => false,
        }
    }

    /// Start every always-on channel; returns how many were started
    pub async fn start_always_on(&self) -> usize {
        let mut started = 0;
        for snapshot in self.registry.snapshots().await {
            if !snapshot.settings.on_demand && self.start(&snapshot.uuid).await {
                started += 1;
            }
        }
        started
    }

    /// Stop all workers
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn spawn(&self, uuid: String, settings: ChannelSettings) {
        let worker = IngestWorker::new(
            uuid,
            settings,
            Arc::clone(&self.registry),
            Arc::clone(&self.dialer),
            self.config.clone(),
            self.shutdown.child_token(),
        );
        tokio::spawn(worker.run());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{Error, Result};
    use crate::ingest::source::{DialRequest, UpstreamSession};

    struct RefusingDialer(AtomicUsize);

    #[async_trait]
    impl UpstreamDialer for RefusingDialer {
        async fn dial(&self, _request: &DialRequest) -> Result<Box<dyn UpstreamSession>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(Error::Timeout("refused"))
        }
    }

    fn supervisor(registry: Arc<Registry>, dialer: Arc<RefusingDialer>) -> IngestSupervisor {
        let config = IngestConfig::default().retry_backoff(Duration::from_millis(20));
        IngestSupervisor::new(registry, dialer, config)
    }

    #[tokio::test]
    async fn test_ensure_running_only_for_on_demand() {
        let registry = Arc::new(Registry::new());
        registry.register("live", ChannelSettings::new("rtsp://a/1")).await;
        registry
            .register("lazy", ChannelSettings::new("rtsp://a/2").on_demand(true))
            .await;
        let dialer = Arc::new(RefusingDialer(AtomicUsize::new(0)));
        let supervisor = supervisor(Arc::clone(&registry), dialer);

        assert!(!supervisor.ensure_running("live").await);
        assert!(!supervisor.ensure_running("missing").await);

        // Keep a viewer so the worker does not exit before the second call
        let _viewer = registry.add_viewer("lazy").await.unwrap();
        assert!(supervisor.ensure_running("LAZY").await);
        assert!(!supervisor.ensure_running("lazy").await);

        supervisor.shutdown();
    }

    #[tokio::test]
    async fn test_start_always_on_retries() {
        let registry = Arc::new(Registry::new());
        registry.register("live", ChannelSettings::new("rtsp://a/1")).await;
        registry
            .register("lazy", ChannelSettings::new("rtsp://a/2").on_demand(true))
            .await;
        let dialer = Arc::new(RefusingDialer(AtomicUsize::new(0)));
        let supervisor = supervisor(Arc::clone(&registry), Arc::clone(&dialer));

        assert_eq!(supervisor.start_always_on().await, 1);
        assert_eq!(supervisor.start_always_on().await, 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(dialer.0.load(Ordering::SeqCst) >= 2);

        let snapshot = registry.snapshot("live").await.unwrap();
        assert!(snapshot.running);
        assert!(!snapshot.status);
        assert!(snapshot.reconnect_count >= 2);

        supervisor.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!registry.snapshot("live").await.unwrap().running);
    }
}

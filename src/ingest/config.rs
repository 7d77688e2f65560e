//! Ingest worker configuration

use std::time::Duration;

/// Timers and buffer sizes for ingest workers
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upstream TCP connect timeout
    pub connect_timeout: Duration,

    /// Upstream read timeout (per frame while streaming, per reply during setup)
    pub read_timeout: Duration,

    /// Session ends if no keyframe arrives within this window
    pub no_video_timeout: Duration,

    /// How often an on-demand session checks for remaining viewers
    pub viewer_check_interval: Duration,

    /// Pause between a failed session and the next dial
    pub retry_backoff: Duration,

    /// Capacity of the drop-oldest buffer between upstream and fan-out
    pub buffer_capacity: usize,

    /// Minimum spacing of viewer-count samples
    pub viewer_sample_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            no_video_timeout: Duration::from_secs(20),
            viewer_check_interval: Duration::from_secs(20),
            retry_backoff: Duration::from_secs(1),
            buffer_capacity: 1000,
            viewer_sample_interval: Duration::from_secs(1),
        }
    }
}

impl IngestConfig {
    /// Set connect and read timeouts
    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Set the no-video window
    pub fn no_video_timeout(mut self, timeout: Duration) -> Self {
        self.no_video_timeout = timeout;
        self
    }

    /// Set the on-demand viewer check interval
    pub fn viewer_check_interval(mut self, interval: Duration) -> Self {
        self.viewer_check_interval = interval;
        self
    }

    /// Set the retry backoff
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the internal buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.no_video_timeout, Duration::from_secs(20));
        assert_eq!(config.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.buffer_capacity, 1000);
    }

    #[test]
    fn test_builders() {
        let config = IngestConfig::default()
            .no_video_timeout(Duration::from_millis(300))
            .viewer_check_interval(Duration::from_millis(50))
            .retry_backoff(Duration::from_millis(10))
            .buffer_capacity(0);
        assert_eq!(config.no_video_timeout, Duration::from_millis(300));
        assert_eq!(config.viewer_check_interval, Duration::from_millis(50));
        assert_eq!(config.retry_backoff, Duration::from_millis(10));
        assert_eq!(config.buffer_capacity, 1);
    }
}

//! Registry configuration

use std::time::Duration;

/// Tunables for the channel registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each viewer's drop-oldest queue
    pub viewer_queue_capacity: usize,

    /// Readiness gate: number of codec polls before giving up
    pub codec_attempts: u32,

    /// Readiness gate: sleep between codec polls
    pub codec_poll_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            viewer_queue_capacity: 100,
            codec_attempts: 100,
            codec_poll_interval: Duration::from_millis(50),
        }
    }
}

impl RegistryConfig {
    /// Set the per-viewer queue capacity
    pub fn viewer_queue_capacity(mut self, capacity: usize) -> Self {
        self.viewer_queue_capacity = capacity.max(1);
        self
    }

    /// Set the readiness budget
    pub fn codec_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.codec_attempts = attempts;
        self.codec_poll_interval = interval;
        self
    }

    /// Longest time `get_codecs` can block
    pub fn codec_wait_budget(&self) -> Duration {
        self.codec_poll_interval * self.codec_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.viewer_queue_capacity, 100);
        assert_eq!(config.codec_attempts, 100);
        assert_eq!(config.codec_wait_budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_builders() {
        let config = RegistryConfig::default()
            .viewer_queue_capacity(0)
            .codec_wait(4, Duration::from_millis(10));
        assert_eq!(config.viewer_queue_capacity, 1);
        assert_eq!(config.codec_wait_budget(), Duration::from_millis(40));
    }
}

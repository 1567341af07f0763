//! Engine configuration, injected at handler construction.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Inactivity threshold after which a session group is evicted.
    pub session_ttl: Duration,
    /// Wake interval of the session-store janitor.
    pub cleanup_interval: Duration,
    /// Per-message outbound deadline; a timed-out connection is
    /// unregistered and closed.
    pub send_timeout: Duration,
    /// Emit a transient `data-lt-loading="true"` marker on the first
    /// render's outer wrapper; the client patcher removes it after
    /// initial synchronization.
    pub loading_indicator: bool,
    /// Attach human-readable diagnostics to outgoing updates.
    pub dev_mode: bool,
    /// Depth of each connection's bounded outbound queue.
    pub outbound_queue_depth: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            send_timeout: Duration::from_secs(5),
            loading_indicator: true,
            dev_mode: false,
            outbound_queue_depth: 64,
        }
    }
}

impl LiveConfig {
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn loading_indicator(mut self, enabled: bool) -> Self {
        self.loading_indicator = enabled;
        self
    }

    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    pub fn outbound_queue_depth(mut self, depth: usize) -> Self {
        self.outbound_queue_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LiveConfig::default();
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3_600));
        assert!(config.loading_indicator);
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_builder_chain() {
        let config = LiveConfig::default()
            .session_ttl(Duration::from_secs(60))
            .dev_mode(true);
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert!(config.dev_mode);
    }
}

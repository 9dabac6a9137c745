//! Push hub configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Push hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Capacity of each connection's outbound mailbox
    ///
    /// A connection whose mailbox is full when a message arrives is evicted.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Ping interval in seconds (for keepalive)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Grace period in seconds after a missed ping before the connection is evicted
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    /// Maximum inbound message size in bytes (default: 64KB)
    #[serde(default = "default_max_message_size")]
    pub max_message_size_bytes: usize,
}

impl HubConfig {
    /// Get the ping interval as a Duration
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Get the pong timeout as a Duration
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Longest silence tolerated before a connection counts as dead
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        self.ping_interval() + self.pong_timeout()
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            max_message_size_bytes: default_max_message_size(),
        }
    }
}

// Default value functions

const fn default_mailbox_capacity() -> usize {
    64
}

const fn default_ping_interval() -> u64 {
    30
}

const fn default_pong_timeout() -> u64 {
    10
}

const fn default_max_message_size() -> usize {
    65536 // 64KB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hub_config() {
        let config = HubConfig::default();
        assert_eq!(config.mailbox_capacity, 64);
        assert_eq!(config.ping_interval_secs, 30);
        assert_eq!(config.max_message_size_bytes, 65536);
    }

    #[test]
    fn test_duration_helpers() {
        let config = HubConfig::default();
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.pong_timeout(), Duration::from_secs(10));
        assert_eq!(config.liveness_window(), Duration::from_secs(40));
    }
}

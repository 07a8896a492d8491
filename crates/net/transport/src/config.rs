//! Transport configuration.

use std::time::Duration;

use chunknet_net_codec::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Default idle time after which the next write reconnects first.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on waiting for the connection tasks during close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single dial.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection settings.
///
/// Durations are written as milliseconds in configuration files. An idle
/// timeout of zero disables idle reconnects.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Idle time after which the next write reconnects before sending.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub idle_timeout: Duration,
    /// Upper bound on waiting for the reader and writer to stop during close.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub close_timeout: Duration,
    /// Upper bound on a single dial.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Largest accepted frame payload.
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Builder-style idle timeout override.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Builder-style close timeout override.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Builder-style connect timeout override.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TransportConfig = toml::from_str("idle_timeout = 250").unwrap();
        assert_eq!(config.idle_timeout, Duration::from_millis(250));
        assert_eq!(config.close_timeout, DEFAULT_CLOSE_TIMEOUT);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<TransportConfig>("idle = 1").is_err());
    }
}

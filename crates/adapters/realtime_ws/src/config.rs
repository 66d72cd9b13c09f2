//! Realtime channel configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the realtime channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the processing backend.
    pub url: String,
    /// Interval between two pings, in seconds.
    pub heartbeat_secs: u64,
    /// Reconnect attempts before the channel is reported lost.
    pub max_reconnect_attempts: u32,
    /// How long a delivery waits for its `command_result`, in seconds.
    pub request_timeout_secs: u64,
}

impl RealtimeConfig {
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            heartbeat_secs: 30,
            max_reconnect_attempts: 5,
            request_timeout_secs: 10,
        }
    }
}

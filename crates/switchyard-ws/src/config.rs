//! WebSocket interface configuration

use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::time::Duration;

/// Configuration for the WebSocket interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct WebSocketInterfaceConfig {
    /// Frames queued for one client; further frames are dropped until it reads
    #[builder(default = "64", getter)]
    pub outbound_queue: usize,

    /// Pause between checks while no client is connected
    #[builder(default = "Duration::from_millis(100)", getter)]
    pub idle_interval: Duration,

    /// Pause after a backend error before receiving again
    #[builder(default = "Duration::from_secs(1)", getter)]
    pub error_backoff: Duration,

    /// Largest message accepted from a client
    #[builder(default = "64 << 20", getter)]
    pub max_message_size: usize,

    /// Largest single frame accepted from a client
    #[builder(default = "16 << 20", getter)]
    pub max_frame_size: usize,
}

impl Default for WebSocketInterfaceConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 64,
            idle_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            max_message_size: 64 << 20, // 64MB
            max_frame_size: 16 << 20,   // 16MB
        }
    }
}

impl WebSocketInterfaceConfigBuilder {
    /// Development configuration
    pub fn development() -> Self {
        WebSocketInterfaceConfigBuilder::new().error_backoff(Duration::from_millis(250))
    }

    /// Production configuration with tighter message limits
    pub fn production() -> Self {
        WebSocketInterfaceConfigBuilder::new()
            .outbound_queue(128)
            .max_message_size(16 << 20)
            .max_frame_size(4 << 20)
    }

    /// Testing configuration with short waits
    pub fn testing() -> Self {
        WebSocketInterfaceConfigBuilder::new()
            .outbound_queue(4)
            .idle_interval(Duration::from_millis(10))
            .error_backoff(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WebSocketInterfaceConfig::default();
        assert_eq!(*config.get_outbound_queue(), 64);
        assert_eq!(*config.get_idle_interval(), Duration::from_millis(100));
        assert_eq!(*config.get_max_frame_size(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_testing_preset() {
        let config = WebSocketInterfaceConfigBuilder::testing()
            .build()
            .expect("Failed to build config");
        assert_eq!(*config.get_outbound_queue(), 4);
        assert_eq!(*config.get_idle_interval(), Duration::from_millis(10));
        assert_eq!(*config.get_max_message_size(), 64 << 20); // Default
    }
}

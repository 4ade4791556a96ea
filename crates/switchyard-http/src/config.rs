//! HTTP interface configuration

use crate::message::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::time::Duration;

/// Configuration for the HTTP codec and interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct HttpInterfaceConfig {
    /// Largest body slice carried by one chunk message
    #[builder(default = "DEFAULT_CHUNK_SIZE", getter)]
    pub chunk_size: usize,

    /// How long to wait for the response start and for each further chunk
    #[builder(default = "Duration::from_secs(60)", getter)]
    pub response_timeout: Duration,

    /// Prefix stripped from the path to form `path_info`
    #[builder(default = "String::new()", getter)]
    pub root_path: String,

    /// Attempts per message when the reply channel is full
    #[builder(default = "5", getter)]
    pub send_retries: u32,

    /// First pause between retries; doubles on each attempt
    #[builder(default = "Duration::from_millis(50)", getter)]
    pub retry_backoff: Duration,

    /// Largest request body accepted
    #[builder(default = "10 * 1024 * 1024", getter)]
    pub max_body_size: usize,
}

impl Default for HttpInterfaceConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            response_timeout: Duration::from_secs(60),
            root_path: String::new(),
            send_retries: 5,
            retry_backoff: Duration::from_millis(50),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl HttpInterfaceConfig {
    /// Pause before retry number `attempt` (starting at 0)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(1u32 << attempt.min(10))
    }
}

impl HttpInterfaceConfigBuilder {
    /// Development configuration with a short response timeout
    pub fn development() -> Self {
        HttpInterfaceConfigBuilder::new().response_timeout(Duration::from_secs(30))
    }

    /// Production configuration
    pub fn production() -> Self {
        HttpInterfaceConfigBuilder::new()
            .response_timeout(Duration::from_secs(60))
            .send_retries(8)
    }

    /// Testing configuration: small chunks and quick timeouts
    pub fn testing() -> Self {
        HttpInterfaceConfigBuilder::new()
            .chunk_size(4)
            .response_timeout(Duration::from_millis(300))
            .send_retries(3)
            .retry_backoff(Duration::from_millis(5))
            .max_body_size(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HttpInterfaceConfig::default();
        assert_eq!(*config.get_chunk_size(), 512 * 1024);
        assert_eq!(*config.get_response_timeout(), Duration::from_secs(60));
        assert!(config.get_root_path().is_empty());
    }

    #[test]
    fn test_builder_presets() {
        let config = HttpInterfaceConfigBuilder::testing()
            .build()
            .expect("Failed to build config");
        assert_eq!(*config.get_chunk_size(), 4);
        assert_eq!(*config.get_send_retries(), 3);

        let config = HttpInterfaceConfigBuilder::new()
            .root_path("/app".to_string())
            .build()
            .expect("Failed to build config");
        assert_eq!(config.get_root_path(), "/app");
        assert_eq!(*config.get_chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = HttpInterfaceConfig::default();
        assert_eq!(config.backoff_for(0), Duration::from_millis(50));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
    }
}

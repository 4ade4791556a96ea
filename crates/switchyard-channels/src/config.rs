//! Backend and worker configuration types and builders

use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::time::Duration;

/// Configuration for the in-memory backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct MemoryConfig {
    /// Maximum queued messages per channel (0 = unlimited)
    #[builder(default = "100", getter)]
    pub capacity: usize,

    /// How long an undelivered message stays receivable
    #[builder(default = "Duration::from_secs(60)", getter)]
    pub message_expiry: Duration,

    /// How long a group membership lasts without being re-added
    #[builder(default = "Duration::from_secs(86400)", getter)]
    pub group_expiry: Duration,

    /// Upper bound on a blocking receive before it returns empty-handed
    #[builder(default = "Duration::from_secs(1)", getter)]
    pub receive_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            message_expiry: Duration::from_secs(60),
            group_expiry: Duration::from_secs(86400), // 1 day
            receive_timeout: Duration::from_secs(1),
        }
    }
}

/// Redis-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct RedisConfig {
    /// Redis connection URL
    #[builder(default = "\"redis://localhost:6379\".to_string()", getter)]
    pub url: String,

    /// Key prefix for channel lists and group sets
    #[builder(default = "\"switchyard\".to_string()", getter)]
    pub key_prefix: String,

    /// Maximum queued messages per channel (0 = unlimited)
    #[builder(default = "100", getter)]
    pub capacity: usize,

    /// Expiry applied to a channel list on every send
    #[builder(default = "Duration::from_secs(60)", getter)]
    pub message_expiry: Duration,

    /// How long a group membership lasts without being re-added
    #[builder(default = "Duration::from_secs(86400)", getter)]
    pub group_expiry: Duration,

    /// BLPOP timeout for blocking receives
    #[builder(default = "Duration::from_secs(1)", getter)]
    pub receive_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "switchyard".to_string(),
            capacity: 100,
            message_expiry: Duration::from_secs(60),
            group_expiry: Duration::from_secs(86400),
            receive_timeout: Duration::from_secs(1),
        }
    }
}

/// Configuration for a worker loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[builder]
pub struct WorkerConfig {
    /// Pause between checks while no consumer is registered
    #[builder(default = "Duration::from_millis(100)", getter)]
    pub idle_interval: Duration,

    /// Pause after a backend error before receiving again
    #[builder(default = "Duration::from_secs(1)", getter)]
    pub error_backoff: Duration,

    /// Use blocking receives (bounded by the backend's receive timeout)
    #[builder(default = "true", getter)]
    pub block: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            block: true,
        }
    }
}

impl MemoryConfigBuilder {
    /// Development configuration: generous capacity, quick wake-ups
    pub fn development() -> Self {
        MemoryConfigBuilder::new()
            .capacity(1000)
            .receive_timeout(Duration::from_millis(500))
    }

    /// Production configuration with conservative defaults
    pub fn production() -> Self {
        MemoryConfigBuilder::new()
            .capacity(100)
            .message_expiry(Duration::from_secs(60))
            .receive_timeout(Duration::from_secs(1))
    }

    /// Testing configuration with short timeouts
    pub fn testing() -> Self {
        MemoryConfigBuilder::new()
            .capacity(0)
            .message_expiry(Duration::from_secs(10))
            .group_expiry(Duration::from_secs(10))
            .receive_timeout(Duration::from_millis(50))
    }
}

impl RedisConfigBuilder {
    /// Create a development Redis configuration
    pub fn development() -> Self {
        RedisConfigBuilder::new()
            .url("redis://localhost:6379".to_string())
            .key_prefix("switchyard_dev".to_string())
    }

    /// Create a production Redis configuration
    pub fn production() -> Self {
        RedisConfigBuilder::new()
            .capacity(100)
            .receive_timeout(Duration::from_secs(2))
            .key_prefix("switchyard_prod".to_string())
    }

    /// Create a testing Redis configuration
    pub fn testing() -> Self {
        RedisConfigBuilder::new()
            .url("redis://localhost:6379".to_string())
            .key_prefix("switchyard_test".to_string())
            .message_expiry(Duration::from_secs(5))
    }
}

impl WorkerConfigBuilder {
    /// Testing configuration with fast idle polling
    pub fn testing() -> Self {
        WorkerConfigBuilder::new()
            .idle_interval(Duration::from_millis(10))
            .error_backoff(Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_memory_config() {
        let config = MemoryConfig::default();
        assert_eq!(*config.get_capacity(), 100);
        assert_eq!(*config.get_message_expiry(), Duration::from_secs(60));
        assert_eq!(*config.get_receive_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_memory_config_builder() {
        let config = MemoryConfigBuilder::new()
            .capacity(8)
            .build()
            .expect("Failed to build config");

        assert_eq!(*config.get_capacity(), 8);
        assert_eq!(*config.get_group_expiry(), Duration::from_secs(86400)); // Default
    }

    #[test]
    fn test_testing_presets() {
        let memory = MemoryConfigBuilder::testing()
            .build()
            .expect("Failed to build config");
        assert_eq!(*memory.get_capacity(), 0);
        assert_eq!(*memory.get_receive_timeout(), Duration::from_millis(50));

        let worker = WorkerConfigBuilder::testing()
            .build()
            .expect("Failed to build config");
        assert_eq!(*worker.get_idle_interval(), Duration::from_millis(10));
        assert!(*worker.get_block());
    }

    #[test]
    fn test_redis_config_builder() {
        let config = RedisConfigBuilder::new()
            .url("redis://custom:6380".to_string())
            .capacity(15)
            .build()
            .expect("Failed to build config");

        assert_eq!(config.get_url(), "redis://custom:6380");
        assert_eq!(*config.get_capacity(), 15);
        assert_eq!(config.get_key_prefix(), "switchyard");
    }
}

//! Channel layers: every configured backend, addressed by alias
//!
//! A [`ChannelLayersConfig`] names one or more backends and a routing table
//! for each. [`ChannelLayers::build`] constructs the backends and registers
//! the routed consumers, so nothing touches the registries after startup.

use crate::{
    ChannelBackend, ChannelError, ChannelResult, Consumer, MemoryBackend, MemoryConfig,
    MemoryConfigBuilder, DEFAULT_ALIAS,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Which store a backend alias uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
}

/// Tunables shared by the backend kinds. Unset fields keep the backend's
/// defaults; `url` and `key_prefix` only apply to Redis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,

    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_expiry: Option<u64>,

    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_expiry: Option<u64>,

    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl BackendOptions {
    fn memory_config(&self) -> ChannelResult<MemoryConfig> {
        let mut builder = MemoryConfigBuilder::new();
        if let Some(capacity) = self.capacity {
            builder = builder.capacity(capacity);
        }
        if let Some(secs) = self.message_expiry {
            builder = builder.message_expiry(Duration::from_secs(secs));
        }
        if let Some(secs) = self.group_expiry {
            builder = builder.group_expiry(Duration::from_secs(secs));
        }
        if let Some(ms) = self.receive_timeout_ms {
            builder = builder.receive_timeout(Duration::from_millis(ms));
        }
        builder
            .build()
            .map_err(|e| ChannelError::Configuration(e.to_string()))
    }

    #[cfg(feature = "redis-backend")]
    fn redis_config(&self) -> ChannelResult<crate::RedisConfig> {
        let mut builder = crate::RedisConfigBuilder::new();
        if let Some(url) = &self.url {
            builder = builder.url(url.clone());
        }
        if let Some(prefix) = &self.key_prefix {
            builder = builder.key_prefix(prefix.clone());
        }
        if let Some(capacity) = self.capacity {
            builder = builder.capacity(capacity);
        }
        if let Some(secs) = self.message_expiry {
            builder = builder.message_expiry(Duration::from_secs(secs));
        }
        if let Some(secs) = self.group_expiry {
            builder = builder.group_expiry(Duration::from_secs(secs));
        }
        if let Some(ms) = self.receive_timeout_ms {
            builder = builder.receive_timeout(Duration::from_millis(ms));
        }
        builder
            .build()
            .map_err(|e| ChannelError::Configuration(e.to_string()))
    }
}

/// One backend alias: its store, routing table and options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub backend: BackendKind,

    /// Channel name to consumer name
    #[serde(default)]
    pub routing: BTreeMap<String, String>,

    #[serde(flatten)]
    pub options: BackendOptions,
}

impl BackendSettings {
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            routing: BTreeMap::new(),
            options: BackendOptions::default(),
        }
    }

    /// Route `channel` to the consumer registered under `consumer`
    pub fn route<C: Into<String>, N: Into<String>>(mut self, channel: C, consumer: N) -> Self {
        self.routing.insert(channel.into(), consumer.into());
        self
    }
}

/// Alias map of configured backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLayersConfig {
    /// Alias used when callers do not ask for one
    #[serde(default = "default_alias")]
    pub default: String,

    pub backends: BTreeMap<String, BackendSettings>,
}

fn default_alias() -> String {
    DEFAULT_ALIAS.to_string()
}

impl Default for ChannelLayersConfig {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert(DEFAULT_ALIAS.to_string(), BackendSettings::memory());
        Self {
            default: default_alias(),
            backends,
        }
    }
}

impl ChannelLayersConfig {
    pub fn from_yaml_str(source: &str) -> ChannelResult<Self> {
        let config: Self = serde_yaml::from_str(source)
            .map_err(|e| ChannelError::Configuration(format!("Invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(source: &str) -> ChannelResult<Self> {
        let config: Self = serde_json::from_str(source)
            .map_err(|e| ChannelError::Configuration(format!("Invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ChannelResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            ChannelError::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&source),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&source),
            other => Err(ChannelError::Configuration(format!(
                "Unsupported config format: {:?}",
                other
            ))),
        }
    }

    /// Add or replace an alias
    pub fn with_backend<A: Into<String>>(mut self, alias: A, settings: BackendSettings) -> Self {
        self.backends.insert(alias.into(), settings);
        self
    }

    pub fn validate(&self) -> ChannelResult<()> {
        if !self.backends.contains_key(&self.default) {
            return Err(ChannelError::Configuration(format!(
                "Default channel backend alias '{}' is not configured",
                self.default
            )));
        }
        Ok(())
    }
}

/// Named consumers available to routing tables
pub type ConsumerCatalog = HashMap<String, Arc<dyn Consumer>>;

/// Every configured backend, built once at startup
pub struct ChannelLayers {
    default: String,
    backends: HashMap<String, Arc<dyn ChannelBackend>>,
}

impl ChannelLayers {
    /// Build every backend in `config` and register its routing table.
    ///
    /// Fails before creating any backend if the default alias is missing or
    /// a route names a consumer that is not in `catalog`.
    pub async fn build(config: ChannelLayersConfig, catalog: &ConsumerCatalog) -> ChannelResult<Self> {
        config.validate()?;
        for (alias, settings) in &config.backends {
            for (channel, consumer) in &settings.routing {
                if !catalog.contains_key(consumer) {
                    return Err(ChannelError::Configuration(format!(
                        "Backend '{}' routes channel '{}' to unknown consumer '{}'",
                        alias, channel, consumer
                    )));
                }
            }
        }

        let mut backends = HashMap::new();
        for (alias, settings) in config.backends {
            let backend = Self::create_backend(&alias, &settings).await?;

            // One registration per consumer so its channels succeed or fail together
            let mut by_consumer: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for (channel, consumer) in &settings.routing {
                by_consumer
                    .entry(consumer.as_str())
                    .or_default()
                    .push(channel.as_str());
            }
            for (name, channels) in by_consumer {
                if let Some(consumer) = catalog.get(name) {
                    backend.registry().add_shared(consumer.clone(), channels)?;
                }
            }

            info!(
                backend = %alias,
                kind = ?settings.backend,
                "Channel backend ready with channels: {:?}",
                backend.registry().channel_names()
            );
            backends.insert(alias, backend);
        }

        Ok(Self {
            default: config.default,
            backends,
        })
    }

    /// A single in-memory backend under the default alias
    pub fn in_memory(config: MemoryConfig) -> Self {
        Self::from_backend(Arc::new(MemoryBackend::new(config)))
    }

    /// Wrap an already constructed backend as the default
    pub fn from_backend(backend: Arc<dyn ChannelBackend>) -> Self {
        let default = backend.alias().to_string();
        let mut backends = HashMap::new();
        backends.insert(default.clone(), backend);
        Self { default, backends }
    }

    async fn create_backend(
        alias: &str,
        settings: &BackendSettings,
    ) -> ChannelResult<Arc<dyn ChannelBackend>> {
        match settings.backend {
            BackendKind::Memory => Ok(Arc::new(MemoryBackend::with_alias(
                alias,
                settings.options.memory_config()?,
            ))),
            #[cfg(feature = "redis-backend")]
            BackendKind::Redis => {
                let backend =
                    crate::RedisBackend::new(alias, settings.options.redis_config()?).await?;
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "redis-backend"))]
            BackendKind::Redis => Err(ChannelError::Configuration(format!(
                "Backend '{}' needs the redis-backend feature",
                alias
            ))),
        }
    }

    /// Backend configured under `alias`
    pub fn get(&self, alias: &str) -> ChannelResult<Arc<dyn ChannelBackend>> {
        self.backends
            .get(alias)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownBackend(alias.to_string()))
    }

    pub fn default_backend(&self) -> ChannelResult<Arc<dyn ChannelBackend>> {
        self.get(&self.default)
    }

    pub fn default_alias(&self) -> &str {
        &self.default
    }

    /// Configured aliases, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.backends.keys().cloned().collect();
        aliases.sort();
        aliases
    }
}

impl std::fmt::Debug for ChannelLayers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLayers")
            .field("default", &self.default)
            .field("aliases", &self.aliases())
            .finish()
    }
}

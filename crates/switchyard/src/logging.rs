//! # Structured Logging
//!
//! `tracing-subscriber` setup for switchyard processes: JSON output for
//! production, pretty output for development, env-filter overrides.

use serde_json::{json, Value};
use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Enable pretty printing for development
    pub pretty_print: bool,
    /// Include file and line number information
    pub include_location: bool,
    /// Custom fields logged once at startup
    pub global_fields: serde_json::Map<String, Value>,
    /// Environment filter (e.g. "switchyard_channels=debug,axum=info")
    pub env_filter: Option<String>,
    /// Service name to include in startup logs
    pub service_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            pretty_print: true,
            include_location: false,
            global_fields: serde_json::Map::new(),
            env_filter: None,
            service_name: None,
        }
    }
}

impl LoggingConfig {
    /// Create production logging configuration
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            json_format: true,
            pretty_print: false,
            include_location: false,
            global_fields: {
                let mut fields = serde_json::Map::new();
                fields.insert("env".to_string(), json!("production"));
                fields
            },
            env_filter: Some(
                "switchyard=info,switchyard_channels=info,switchyard_http=info,switchyard_ws=info,tower=warn,axum=warn"
                    .to_string(),
            ),
            service_name: None,
        }
    }

    /// Create development logging configuration
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            pretty_print: true,
            include_location: true,
            global_fields: {
                let mut fields = serde_json::Map::new();
                fields.insert("env".to_string(), json!("development"));
                fields
            },
            env_filter: Some(
                "switchyard=debug,switchyard_channels=debug,switchyard_http=debug,switchyard_ws=debug,tungstenite=info"
                    .to_string(),
            ),
            service_name: None,
        }
    }

    /// Create test logging configuration (minimal output)
    pub fn test() -> Self {
        Self {
            level: "error".to_string(),
            json_format: false,
            pretty_print: false,
            include_location: false,
            global_fields: serde_json::Map::new(),
            env_filter: None,
            service_name: None,
        }
    }

    /// Add a field logged with the startup message
    pub fn with_global_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.global_fields.insert(key.into(), value.into());
        self
    }

    pub fn with_service(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Replace the level; clears any preset env filter so the level applies
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self.env_filter = None;
        self
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Filter directive used when `RUST_LOG` is not set
    pub fn filter_directive(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured filter. Fails if a subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.filter_directive()))?;

    let layer = Layer::new()
        .with_writer(io::stdout)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?;
    } else if config.pretty_print {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
    }

    tracing::info!(target: "switchyard::logging", "{}", init_fields(&config));

    Ok(())
}

/// Fields of the line logged once the subscriber is installed
fn init_fields(config: &LoggingConfig) -> Value {
    let mut fields = json!({
        "message": "Logging initialized",
        "level": config.level,
        "format": if config.json_format { "JSON" } else { "text" },
    });
    if let Some(service) = &config.service_name {
        fields["service"] = json!(service);
    }
    for (key, value) in &config.global_fields {
        fields[key.as_str()] = value.clone();
    }
    fields
}

/// Log process startup with system information
pub fn log_startup_info(service_name: &str, service_version: &str) {
    let startup_info = json!({
        "event": "application_startup",
        "service": service_name,
        "version": service_version,
        "pid": std::process::id(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    });

    tracing::info!(target: "switchyard::startup", "{}", startup_info);
}

/// Log process shutdown
pub fn log_shutdown_info(service_name: &str) {
    let shutdown_info = json!({
        "event": "application_shutdown",
        "service": service_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    tracing::info!(target: "switchyard::shutdown", "{}", shutdown_info);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let production = LoggingConfig::production();
        assert!(production.json_format);
        assert_eq!(production.global_fields["env"], json!("production"));

        let development = LoggingConfig::development();
        assert!(development.pretty_print);
        assert!(development.include_location);

        assert_eq!(LoggingConfig::test().level, "error");
    }

    #[test]
    fn test_filter_directive() {
        let config = LoggingConfig::development();
        assert!(config.filter_directive().starts_with("switchyard=debug"));

        let config = config.with_level("warn");
        assert_eq!(config.filter_directive(), "warn");

        let config = LoggingConfig::default().with_env_filter("switchyard_ws=trace");
        assert_eq!(config.filter_directive(), "switchyard_ws=trace");
    }

    #[test]
    fn test_builder_helpers() {
        let config = LoggingConfig::default()
            .with_service("switchyard")
            .with_global_field("region", "eu");
        assert_eq!(config.service_name.as_deref(), Some("switchyard"));
        assert_eq!(config.global_fields["region"], json!("eu"));
    }

    #[test]
    fn test_init_line_names_the_service() {
        let fields = init_fields(&LoggingConfig::production().with_service("switchyard"));
        assert_eq!(fields["service"], json!("switchyard"));
        assert_eq!(fields["env"], json!("production"));
        assert_eq!(fields["format"], json!("JSON"));

        let fields = init_fields(&LoggingConfig::default());
        assert!(fields.get("service").is_none());
    }
}

//! Configuration management.

use serde::Deserialize;

use crate::error::Result;
use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoreConfig {
    /// Store configuration
    #[serde(default)]
    pub store: StoreSettings,

    /// Migration configuration
    #[serde(default)]
    pub migration: MigrationSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Realm used when a caller does not name one explicitly
    #[serde(default = "default_realm")]
    pub default_realm: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            default_realm: default_realm(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationSettings {
    /// Buffer size for migration progress channels
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

// Default value functions
fn default_realm() -> String {
    "default".to_string()
}

fn default_event_buffer() -> usize {
    64
}

impl CoreConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("TESSERA").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.store.default_realm, "default");
        assert_eq!(config.migration.event_buffer, 64);
    }
}

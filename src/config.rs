//! Configuration management for the analytics data layer
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (analytics.toml)
//! - Environment variables (ANALYTICS__*)
//!
//! ## Example config file (analytics.toml):
//! ```toml
//! [validation]
//! dependency_policy = "reject"
//!
//! [data_layer]
//! history_capacity = 50
//!
//! [schemas]
//! paths = ["schemas/page.json", "schemas/checkout"]
//!
//! [logging]
//! filter = "familiar_analytics=debug"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::registry::SchemaRegistry;
use crate::validator::DependencyPolicy;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Validation settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Data layer settings
    #[serde(default)]
    pub data_layer: DataLayerConfig,

    /// Schema definition sources
    #[serde(default)]
    pub schemas: SchemasConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Validation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// What to do with a supplied field whose dependency is unsatisfied
    #[serde(default)]
    pub dependency_policy: DependencyPolicy,
}

/// Data layer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataLayerConfig {
    /// Number of successful pushes kept for debugging (0 disables the buffer)
    #[serde(default)]
    pub history_capacity: usize,
}

/// Schema definition sources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemasConfig {
    /// Definition files or directories, loaded in order
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when RUST_LOG is unset
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl AnalyticsConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the default locations
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["analytics.toml", ".analytics.toml", "config/analytics.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "analytics") {
            let xdg_config = config_dir.config_dir().join("analytics.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (ANALYTICS__*)
        builder = builder.add_source(
            Environment::with_prefix("ANALYTICS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Build a registry from the configured definition paths
    pub fn build_registry(&self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for path in &self.schemas.paths {
            if path.is_dir() {
                registry.load_dir(path)?;
            } else {
                registry.load_file(path)?;
            }
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalyticsConfig::default();
        assert_eq!(config.validation.dependency_policy, DependencyPolicy::Reject);
        assert_eq!(config.data_layer.history_capacity, 0);
        assert_eq!(config.logging.filter, "info");
        assert!(config.schemas.paths.is_empty());
    }

    #[test]
    fn test_serialize_config() {
        let config = AnalyticsConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[validation]"));
        assert!(toml_str.contains("dependency_policy = \"reject\""));
        assert!(toml_str.contains("[data_layer]"));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[validation]\ndependency_policy = \"omit\"\n\n[data_layer]\nhistory_capacity = 8\n",
        )
        .unwrap();

        let config = AnalyticsConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.validation.dependency_policy, DependencyPolicy::Omit);
        assert_eq!(config.data_layer.history_capacity, 8);
    }

    #[test]
    fn test_build_registry_from_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("page.json"),
            r#"{ "name": "Page", "properties": { "pageHost": { "type": "text", "required": true } } }"#,
        )
        .unwrap();

        let config = AnalyticsConfig {
            schemas: SchemasConfig {
                paths: vec![dir.path().to_path_buf()],
            },
            ..AnalyticsConfig::default()
        };
        let registry = config.build_registry().unwrap();
        assert!(registry.contains("Page"));
    }
}

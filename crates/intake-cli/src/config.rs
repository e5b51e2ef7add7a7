//! Process configuration: defaults, then an optional TOML file, then env.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use intake_core::ServiceConfig;
use serde::{Deserialize, Serialize};

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const LOG_LEVEL_ENV: &str = "INTAKE_LOG_LEVEL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub database: DatabaseConfig,
    pub service: ServiceSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/intake".to_string(),
            max_connections: 10,
            acquire_timeout_ms: 3_000,
        }
    }
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl IntakeConfig {
    /// Parse a TOML document. Missing sections and keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid intake configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Defaults, overlaid by `path` when given, overlaid by the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Apply overrides from an environment lookup.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(DATABASE_URL_ENV) {
            self.database.url = url;
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.logging.level = level;
        }
        self
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            operation_timeout: Duration::from_millis(self.service.operation_timeout_ms),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.database.acquire_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = IntakeConfig::from_toml_str(
            r#"
            [database]
            url = "postgres://db:5432/pvz"

            [logging]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.database.url, "postgres://db:5432/pvz");
        assert_eq!(config.database.max_connections, 10);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.service_config().operation_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = IntakeConfig::default().with_env(|key| match key {
            DATABASE_URL_ENV => Some("postgres://env/intake".to_string()),
            LOG_LEVEL_ENV => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(config.database.url, "postgres://env/intake");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_value_type_is_rejected() {
        let err = IntakeConfig::from_toml_str("[service]\noperation_timeout_ms = \"soon\"");
        assert!(err.is_err());
    }
}

//! Application configuration.
//!
//! Loaded from an optional YAML file plus environment variables with the
//! `KAFGATE` prefix.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "KAFGATE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "KAFGATE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "KAFGATE_LOG";

/// Default read timeout in seconds for consume operations.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 10;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name, used in log output.
    pub name: String,
    /// Listen address for the HTTP server.
    pub address: String,
    /// Listen port for the HTTP server.
    pub port: u16,
    /// Kafka bootstrap servers (comma-separated).
    pub brokers: String,
    /// Backend client strategy: "direct" or "stream".
    pub backend: String,
    /// Read timeout in seconds for consume operations.
    pub read_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "kafgate".to_string(),
            address: "0.0.0.0".to_string(),
            port: 8080,
            brokers: "localhost:9092".to_string(),
            backend: "direct".to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in the current directory (if it exists)
    /// 2. File specified by the `path` argument (if provided)
    /// 3. File specified by the `KAFGATE_CONFIG` environment variable (if set)
    /// 4. Environment variables with the `KAFGATE` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Socket address string for the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.backend, "direct");
        assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT_SECS);
    }

    #[test]
    fn test_bind_addr() {
        let config = Config {
            address: "127.0.0.1".to_string(),
            port: 9090,
            ..Config::default()
        };
        assert_eq!(config.bind_addr(), "127.0.0.1:9090");
    }
}

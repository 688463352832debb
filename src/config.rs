//! Configuration management for Mealmatch.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `MEALMATCH__*` environment variables (`__` separates sections, e.g.
//! `MEALMATCH__STORE__REDIS_URL`). The binary applies CLI overrides last.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::error::{MealmatchError, Result};
use crate::ratelimit::{DEFAULT_EXPIRATION_WINDOW_SECS, DEFAULT_KEY_PREFIX, MAX_PERIOD_SECONDS};
use crate::store::StoreConfig;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "MEALMATCH";

/// Main configuration for the Mealmatch gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MealmatchConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Take the caller's address from `X-Forwarded-For` when present.
    /// Only enable behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_forwarded_for: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

/// What to do with a request when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Reject the request with 503
    #[default]
    Closed,
    /// Let the request through without rate limit metadata
    Open,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the rate limit rules file
    pub rules_path: Option<String>,

    /// Rules reload interval in seconds
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    /// Prefix of counter keys in the store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Seconds a counter outlives its window
    #[serde(default = "default_expiration_window")]
    pub expiration_window_secs: u64,

    /// Behaviour when the store is unavailable
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            reload_interval_secs: default_reload_interval(),
            key_prefix: default_key_prefix(),
            expiration_window_secs: default_expiration_window(),
            failure_mode: FailureMode::default(),
        }
    }
}

fn default_reload_interval() -> u64 {
    60
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_expiration_window() -> u64 {
    DEFAULT_EXPIRATION_WINDOW_SECS
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Compact,
    /// JSON lines
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level or filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MealmatchConfig {
    /// Load configuration from an optional YAML file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(MealmatchError::Config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Yaml,
            ));
        }

        let config: MealmatchConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.key_prefix.is_empty() {
            return Err(MealmatchError::Config(
                "rate_limiting.key_prefix must not be empty".to_string(),
            ));
        }
        if self.rate_limiting.reload_interval_secs == 0 {
            return Err(MealmatchError::Config(
                "rate_limiting.reload_interval_secs must be positive".to_string(),
            ));
        }
        if self.rate_limiting.expiration_window_secs > MAX_PERIOD_SECONDS {
            return Err(MealmatchError::Config(format!(
                "rate_limiting.expiration_window_secs must not exceed {}",
                MAX_PERIOD_SECONDS
            )));
        }
        if self.store.purge_interval_secs == 0 {
            return Err(MealmatchError::Config(
                "store.purge_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreBackend;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("mealmatch-{}.yaml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = MealmatchConfig::default();

        assert_eq!(config.server.listen_addr, "127.0.0.1:5000".parse().unwrap());
        assert!(!config.server.trust_forwarded_for);
        assert_eq!(config.rate_limiting.key_prefix, "rate-limit");
        assert_eq!(config.rate_limiting.expiration_window_secs, 10);
        assert_eq!(config.rate_limiting.failure_mode, FailureMode::Closed);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_all_sections() {
        let path = write_temp(
            r#"
server:
  listen_addr: "0.0.0.0:8080"
  trust_forwarded_for: true
store:
  backend: memory
rate_limiting:
  failure_mode: open
  expiration_window_secs: 15
logging:
  format: json
"#,
        );

        let config = MealmatchConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.listen_addr.port(), 8080);
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.rate_limiting.failure_mode, FailureMode::Open);
        assert_eq!(config.rate_limiting.expiration_window_secs, 15);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_layers_file() {
        let path = write_temp(
            r#"
rate_limiting:
  key_prefix: mm
"#,
        );

        let config = MealmatchConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.rate_limiting.key_prefix, "mm");
        assert_eq!(config.rate_limiting.reload_interval_secs, 60);
    }

    #[test]
    fn test_load_missing_file() {
        let result = MealmatchConfig::load(Some(Path::new("/nonexistent/mealmatch.yaml")));
        assert!(matches!(result, Err(MealmatchError::Config(_))));
    }

    #[test]
    fn test_oversized_expiration_window_rejected() {
        let mut config = MealmatchConfig::default();
        config.rate_limiting.expiration_window_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(MealmatchError::Config(_))));

        config.rate_limiting.expiration_window_secs = MAX_PERIOD_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let mut config = MealmatchConfig::default();
        config.rate_limiting.key_prefix.clear();
        assert!(config.validate().is_err());
    }
}

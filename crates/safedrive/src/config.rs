//! Configuration management for safedrive.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::telemetry::AlcoholUnit;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "safedrive";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "safedrive.db";

/// Key under which the evidence log is stored.
pub const DEFAULT_EVIDENCE_KEY: &str = "safedrive_saved_data";

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "SAFEDRIVE_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SAFEDRIVE_`, sections split by `__`)
/// 2. TOML config file at `~/.config/safedrive/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote API configuration.
    pub api: ApiConfig,
    /// Poll scheduling.
    pub polling: PollingConfig,
    /// Ingestion-boundary unit conversion.
    pub ingest: IngestConfig,
    /// Local storage configuration.
    pub storage: StorageConfig,
}

/// Remote API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the telemetry backend.
    pub base_url: String,
    /// Transport timeout for a single request in milliseconds.
    pub request_timeout_ms: u64,
}

/// Poll scheduling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Period of the latest-sample poll in milliseconds.
    pub sample_interval_ms: u64,
    /// Period of the vehicle position poll in milliseconds.
    pub position_interval_ms: u64,
    /// Period of the backend health probe in milliseconds.
    pub health_interval_ms: u64,
}

/// Ingestion configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Unit the backend uses for the alcohol signal.
    pub alcohol_unit: AlcoholUnit,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/safedrive/safedrive.db`
    pub database_path: Option<PathBuf>,
    /// Key holding the serialized evidence log.
    pub evidence_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fire-h0u2.onrender.com".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1_000,
            position_interval_ms: 2_000,
            health_interval_ms: 5_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Resolved at runtime
            evidence_key: DEFAULT_EVIDENCE_KEY.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file that must exist.
    ///
    /// Environment overrides still apply on top of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be parsed, or holds
    /// invalid values.
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::ConfigValidation {
                message: format!("configuration file {} not found", path.display()),
            });
        }
        Self::load_from(Some(path.to_path_buf()))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "api.base_url must not be empty".to_string(),
            });
        }

        if self.api.request_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "request_timeout_ms must be greater than 0".to_string(),
            });
        }

        for (name, value) in [
            ("sample_interval_ms", self.polling.sample_interval_ms),
            ("position_interval_ms", self.polling.position_interval_ms),
            ("health_interval_ms", self.polling.health_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.storage.evidence_key.is_empty() {
            return Err(Error::ConfigValidation {
                message: "evidence_key must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the latest-sample poll period.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.polling.sample_interval_ms)
    }

    /// Get the position poll period.
    #[must_use]
    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.polling.position_interval_ms)
    }

    /// Get the health probe period.
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.polling.health_interval_ms)
    }

    /// Get the per-request transport timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.base_url, "https://fire-h0u2.onrender.com");
        assert_eq!(config.ingest.alcohol_unit, AlcoholUnit::Ratio);
        assert_eq!(config.storage.evidence_key, DEFAULT_EVIDENCE_KEY);
    }

    #[test]
    fn test_default_polling_config() {
        let polling = PollingConfig::default();

        assert_eq!(polling.sample_interval_ms, 1_000);
        assert_eq!(polling.position_interval_ms, 2_000);
        assert_eq!(polling.health_interval_ms, 5_000);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_sample_interval() {
        let mut config = Config::default();
        config.polling.sample_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sample_interval_ms"));
    }

    #[test]
    fn test_validate_zero_position_interval() {
        let mut config = Config::default();
        config.polling.position_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("position_interval_ms"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.api.request_timeout_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("request_timeout_ms"));
    }

    #[test]
    fn test_validate_empty_base_url() {
        let mut config = Config::default();
        config.api.base_url = "  ".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_evidence_key() {
        let mut config = Config::default();
        config.storage.evidence_key = String::new();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("evidence_key"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config.database_path().to_string_lossy().contains("safedrive.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_intervals() {
        let config = Config::default();

        assert_eq!(config.sample_interval(), Duration::from_millis(1_000));
        assert_eq!(config.position_interval(), Duration::from_millis(2_000));
        assert_eq!(config.health_interval(), Duration::from_millis(5_000));
        assert_eq!(config.request_timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("safedrive"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[polling]
sample_interval_ms = 2000

[ingest]
alcohol_unit = "raw_adc"
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.polling.sample_interval_ms, 2_000);
        assert_eq!(config.polling.position_interval_ms, 2_000);
        assert_eq!(config.ingest.alcohol_unit, AlcoholUnit::RawAdc);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[polling]\nhealth_interval_ms = 0\n").unwrap();

        let err = Config::load_from(Some(path)).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_load_file_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_load_file_reports_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\nrequest_timeout_ms = 0\n").unwrap();

        assert!(Config::load_file(&path).is_err());

        std::fs::write(&path, "[api]\nrequest_timeout_ms = 2500\n").unwrap();
        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.api.request_timeout_ms, 2_500);
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("sample_interval_ms"));
        assert!(json.contains("\"alcohol_unit\":\"ratio\""));
    }
}

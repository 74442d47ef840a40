//! Configuration loading and validation.
//!
//! This module handles:
//! - Loading `busprobe.toml`
//! - Config resolution order (CLI > env > XDG > defaults)
//! - Semantic validation (positive timeouts, poll interval within timeout)
//! - Config snapshot generation for `busprobe config show`

pub mod validation;

pub use validation::{validate_config, ValidationError};

use crate::bus::BusSelector;
use crate::constants::AUTOPILOT_PATH;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Default XDG config directory name.
const CONFIG_DIR_NAME: &str = "busprobe";

/// File looked up inside the config directory.
pub const CONFIG_FILE_NAME: &str = "busprobe.toml";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid TOML in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl From<ConfigError> for bp_common::Error {
    fn from(err: ConfigError) -> Self {
        bp_common::Error::Config(err.to_string())
    }
}

/// Connection search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SearchSettings {
    pub timeout_secs: f64,
    pub poll_interval_ms: u64,
    pub object_path: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            timeout_secs: 10.0,
            poll_interval_ms: 1000,
            object_path: AUTOPILOT_PATH.to_string(),
        }
    }
}

/// Bus selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BusSettings {
    /// "session", "system", or a custom bus address.
    pub default: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        BusSettings {
            default: "session".to_string(),
        }
    }
}

/// State query settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QuerySettings {
    /// Replies with more objects than this are logged as a warning.
    pub large_reply_warning: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        QuerySettings {
            large_reply_warning: 15,
        }
    }
}

/// Proxy object model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProxySettings {
    pub wait_timeout_secs: f64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        ProxySettings {
            wait_timeout_secs: 10.0,
        }
    }
}

/// Contents of `busprobe.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProbeConfig {
    pub schema_version: String,
    pub search: SearchSettings,
    pub bus: BusSettings,
    pub query: QuerySettings,
    pub proxy: ProxySettings,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            search: SearchSettings::default(),
            bus: BusSettings::default(),
            query: QuerySettings::default(),
            proxy: ProxySettings::default(),
        }
    }
}

impl ProbeConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.search.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.search.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.proxy.wait_timeout_secs)
    }

    pub fn bus_selector(&self) -> BusSelector {
        // FromStr for BusSelector is infallible
        self.bus.default.parse().unwrap_or_default()
    }
}

/// Resolved configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ProbeConfig,
    /// Path to the config file (None if using defaults).
    pub config_path: Option<PathBuf>,
    /// SHA-256 hash of the config file content (None if using defaults).
    pub config_hash: Option<String>,
    /// The config directory used for resolution.
    pub config_dir: PathBuf,
}

impl ResolvedConfig {
    /// Create a config snapshot for `config show` and logs.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            config_path: self.config_path.clone(),
            config_hash: self.config_hash.clone(),
            schema_version: self.config.schema_version.clone(),
            config_dir: self.config_dir.clone(),
            config: self.config.clone(),
        }
    }
}

/// Serializable view of the effective configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConfigSnapshot {
    pub config_path: Option<PathBuf>,
    pub config_hash: Option<String>,
    pub schema_version: String,
    pub config_dir: PathBuf,
    pub config: ProbeConfig,
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config directory (highest priority).
    pub config_dir: Option<PathBuf>,
    /// Explicit config file path.
    pub config_path: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit CLI flags (via ConfigOptions)
/// 2. Environment variable (BUSPROBE_CONFIG_DIR)
/// 3. XDG config home (~/.config/busprobe/)
/// 4. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let config_dir = resolve_config_dir(options);

    let (config, config_path, config_hash) = match &options.config_path {
        Some(path) => {
            let (config, hash) = load_config_from_file(path)?;
            (config, Some(path.clone()), Some(hash))
        }
        None => {
            let default_path = config_dir.join(CONFIG_FILE_NAME);
            if default_path.exists() {
                let (config, hash) = load_config_from_file(&default_path)?;
                (config, Some(default_path), Some(hash))
            } else {
                (ProbeConfig::default(), None, None)
            }
        }
    };

    validate_config(&config)?;

    Ok(ResolvedConfig {
        config,
        config_path,
        config_hash,
        config_dir,
    })
}

/// Resolve the config directory using the standard resolution order.
fn resolve_config_dir(options: &ConfigOptions) -> PathBuf {
    if let Some(dir) = &options.config_dir {
        return dir.clone();
    }

    if let Ok(dir) = std::env::var("BUSPROBE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir()
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        })
        .join(CONFIG_DIR_NAME)
}

fn load_config_from_file(path: &Path) -> Result<(ProbeConfig, String), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let hash = compute_hash(&content);

    let config: ProbeConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(ConfigError::VersionMismatch {
            expected: CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    Ok((config, hash))
}

/// SHA-256 of the file content, hex encoded.
fn compute_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options_for(dir: &TempDir) -> ConfigOptions {
        ConfigOptions {
            config_dir: Some(dir.path().to_path_buf()),
            config_path: None,
        }
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let dir = TempDir::new().unwrap();
        let resolved = load_config(&options_for(&dir)).unwrap();
        assert_eq!(resolved.config, ProbeConfig::default());
        assert!(resolved.config_path.is_none());
        assert_eq!(resolved.config.search_timeout(), Duration::from_secs(10));
        assert_eq!(resolved.config.poll_interval(), Duration::from_secs(1));
        assert_eq!(resolved.config.bus_selector(), BusSelector::Session);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "schema_version = \"1.0.0\"\n[search]\ntimeout_secs = 2.5\n[bus]\ndefault = \"system\"\n",
        )
        .unwrap();

        let resolved = load_config(&options_for(&dir)).unwrap();
        assert_eq!(resolved.config.search.timeout_secs, 2.5);
        assert_eq!(resolved.config.search.poll_interval_ms, 1000);
        assert_eq!(resolved.config.bus_selector(), BusSelector::System);
        assert_eq!(resolved.config.query.large_reply_warning, 15);
    }

    #[test]
    fn snapshot_carries_sha256_of_file() {
        let dir = TempDir::new().unwrap();
        let content = "schema_version = \"1.0.0\"\n";
        fs::write(dir.path().join(CONFIG_FILE_NAME), content).unwrap();

        let snapshot = load_config(&options_for(&dir)).unwrap().snapshot();
        let hash = snapshot.config_hash.clone().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hex::encode(Sha256::digest(content.as_bytes())));
        assert!(serde_json::to_string(&snapshot).is_ok());
    }

    #[test]
    fn schema_version_is_checked() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "schema_version = \"0.9\"\n").unwrap();
        let err = load_config(&options_for(&dir)).unwrap_err();
        assert!(matches!(err, ConfigError::VersionMismatch { .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[search\n").unwrap();
        let err = load_config(&options_for(&dir)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn explicit_file_wins_over_directory() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("other.toml");
        fs::write(&explicit, "[query]\nlarge_reply_warning = 3\n").unwrap();
        let options = ConfigOptions {
            config_dir: Some(dir.path().to_path_buf()),
            config_path: Some(explicit.clone()),
        };
        let resolved = load_config(&options).unwrap();
        assert_eq!(resolved.config_path, Some(explicit));
        assert_eq!(resolved.config.query.large_reply_warning, 3);
    }

    #[test]
    fn config_errors_map_to_config_category() {
        let err: bp_common::Error = ConfigError::VersionMismatch {
            expected: "1.0.0".into(),
            actual: "2".into(),
        }
        .into();
        assert_eq!(err.code(), 10);
    }
}

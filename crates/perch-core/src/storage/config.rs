//! Host configuration.
//!
//! The configuration file may be JSON, YAML or TOML, chosen by extension
//! (YAML and TOML behind the `yaml-config` and `toml-config` features).
//! Every field has a default, so an empty file or no file at all is valid.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{
    DATA_DIR_ENV, DEFAULT_DATA_DIR_NAME, DEFAULT_LOW_POWER_INTERVAL_MS, DEFAULT_PLUGINS_DIR,
    DEFAULT_PROXY_ATTEMPTS, DEFAULT_SAMPLING_INTERVAL_MS, DEFAULT_SETTINGS_FILE, PLUGIN_DATA_DIR,
    SUPPORTED_LANGUAGES,
};
use crate::storage::error::{StorageResult, StorageSystemError};

/// Supported configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    #[cfg(feature = "yaml-config")]
    Yaml,
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub interval_ms: u64,
    pub low_power_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            low_power_interval_ms: DEFAULT_LOW_POWER_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub max_attempts: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PROXY_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root for host-owned files. Relative `plugin_dirs` and `settings_file`
    /// entries resolve against it.
    pub data_dir: PathBuf,
    pub plugin_dirs: Vec<PathBuf>,
    pub settings_file: PathBuf,
    pub supported_languages: Vec<String>,
    /// Start in low-power mode.
    pub low_power: bool,
    pub telemetry: TelemetryConfig,
    pub proxy: ProxyConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            plugin_dirs: vec![PathBuf::from(DEFAULT_PLUGINS_DIR)],
            settings_file: PathBuf::from(DEFAULT_SETTINGS_FILE),
            supported_languages: SUPPORTED_LANGUAGES.iter().map(|l| l.to_string()).collect(),
            low_power: false,
            telemetry: TelemetryConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl HostConfig {
    /// Loads a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| StorageSystemError::UnsupportedConfigFormat(path.display().to_string()))?;
        match std::fs::read_to_string(path) {
            Ok(data) => Self::deserialize(&data, format),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No configuration at '{}', using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(StorageSystemError::io(e, "read_config", path.to_path_buf())),
        }
    }

    pub fn serialize(&self, format: ConfigFormat) -> StorageResult<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| StorageSystemError::serialization("json", e)),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => {
                serde_yaml::to_string(self).map_err(|e| StorageSystemError::serialization("yaml", e))
            }
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| StorageSystemError::serialization("toml", e))
            }
        }
    }

    pub fn deserialize(data: &str, format: ConfigFormat) -> StorageResult<Self> {
        match format {
            ConfigFormat::Json => {
                serde_json::from_str(data).map_err(|e| StorageSystemError::deserialization("json", e))
            }
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => {
                serde_yaml::from_str(data).map_err(|e| StorageSystemError::deserialization("yaml", e))
            }
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => {
                toml::from_str(data).map_err(|e| StorageSystemError::deserialization("toml", e))
            }
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn resolved_plugin_dirs(&self) -> Vec<PathBuf> {
        self.plugin_dirs.iter().map(|d| self.data_dir.join(d)).collect()
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(&self.settings_file)
    }

    pub fn plugin_data_root(&self) -> PathBuf {
        self.data_dir.join(PLUGIN_DATA_DIR)
    }
}

/// `$PERCH_DATA_DIR`, then `$XDG_DATA_HOME/perch`, then
/// `$HOME/.local/share/perch`, then `./.perch`.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = non_empty_env(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = non_empty_env("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join(DEFAULT_DATA_DIR_NAME);
    }
    if let Some(home) = non_empty_env("HOME") {
        return PathBuf::from(home).join(".local").join("share").join(DEFAULT_DATA_DIR_NAME);
    }
    PathBuf::from(format!(".{}", DEFAULT_DATA_DIR_NAME))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

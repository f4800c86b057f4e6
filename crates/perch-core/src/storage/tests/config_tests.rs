#![cfg(test)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;

use crate::kernel::constants::{DEFAULT_LOW_POWER_INTERVAL_MS, DEFAULT_PROXY_ATTEMPTS, DEFAULT_SAMPLING_INTERVAL_MS};
use crate::storage::config::{ConfigFormat, HostConfig};
use crate::storage::error::StorageSystemError;

#[test]
fn test_defaults() {
    let config = HostConfig::default();
    assert_eq!(config.plugin_dirs, vec![PathBuf::from("plugins")]);
    assert_eq!(config.settings_file, PathBuf::from("widgets.json"));
    assert_eq!(config.supported_languages, vec!["rust".to_string()]);
    assert!(!config.low_power);
    assert_eq!(config.telemetry.interval_ms, DEFAULT_SAMPLING_INTERVAL_MS);
    assert_eq!(config.telemetry.low_power_interval_ms, DEFAULT_LOW_POWER_INTERVAL_MS);
    assert_eq!(config.proxy.max_attempts, DEFAULT_PROXY_ATTEMPTS);
}

#[test]
fn test_paths_resolve_against_data_dir() {
    let mut config = HostConfig::default().with_data_dir("/var/lib/perch");
    config.plugin_dirs.push(PathBuf::from("/opt/perch/plugins"));
    assert_eq!(
        config.resolved_plugin_dirs(),
        vec![PathBuf::from("/var/lib/perch/plugins"), PathBuf::from("/opt/perch/plugins")]
    );
    assert_eq!(config.settings_path(), PathBuf::from("/var/lib/perch/widgets.json"));
    assert_eq!(config.plugin_data_root(), PathBuf::from("/var/lib/perch/plugin-data"));
}

#[test]
fn test_load_missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let config = HostConfig::load(&dir.path().join("perch.json")).unwrap();
    assert_eq!(config.telemetry.interval_ms, DEFAULT_SAMPLING_INTERVAL_MS);
}

#[test]
fn test_load_partial_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("perch.json");
    fs::write(&path, r#"{ "low_power": true, "telemetry": { "interval_ms": 250 } }"#).unwrap();

    let config = HostConfig::load(&path).unwrap();
    assert!(config.low_power);
    assert_eq!(config.telemetry.interval_ms, 250);
    assert_eq!(config.telemetry.low_power_interval_ms, DEFAULT_LOW_POWER_INTERVAL_MS);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let err = HostConfig::load(Path::new("/etc/perch.ini")).unwrap_err();
    assert!(matches!(err, StorageSystemError::UnsupportedConfigFormat(_)));
    assert_eq!(ConfigFormat::from_path(Path::new("perch.JSON")), Some(ConfigFormat::Json));
}

#[test]
fn test_malformed_json_is_deserialization_error() {
    let err = HostConfig::deserialize("{ nope", ConfigFormat::Json).unwrap_err();
    assert!(matches!(err, StorageSystemError::DeserializationError { ref format, .. } if format == "json"));
}

#[cfg(feature = "yaml-config")]
#[test]
fn test_yaml_config() {
    let yaml = "data_dir: /srv/perch\nplugin_dirs:\n  - plugins\n  - extra\nproxy:\n  max_attempts: 5\n";
    let config = HostConfig::deserialize(yaml, ConfigFormat::Yaml).unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/srv/perch"));
    assert_eq!(config.plugin_dirs.len(), 2);
    assert_eq!(config.proxy.max_attempts, 5);
    assert_eq!(ConfigFormat::from_path(Path::new("perch.yml")), Some(ConfigFormat::Yaml));
}

#[cfg(feature = "toml-config")]
#[test]
fn test_toml_round_trip() {
    let mut config = HostConfig::default().with_data_dir("/srv/perch");
    config.low_power = true;
    config.telemetry.interval_ms = 2_000;

    let text = config.serialize(ConfigFormat::Toml).unwrap();
    let parsed = HostConfig::deserialize(&text, ConfigFormat::Toml).unwrap();
    assert_eq!(parsed, config);
    assert_eq!(ConfigFormat::Toml.extension(), "toml");
}

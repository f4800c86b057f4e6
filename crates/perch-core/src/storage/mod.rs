pub mod config;
pub mod error;
pub mod local;
pub mod provider;
pub mod settings;

pub use config::{ConfigFormat, HostConfig, ProxyConfig, TelemetryConfig};
pub use error::{StorageResult, StorageSystemError};
pub use local::LocalStorageProvider;
pub use provider::StorageProvider;
pub use settings::{
    Placement, PreserveAll, SettingsBlob, SettingsResolver, SettingsStore, WidgetInstance,
};

// Test module declaration
#[cfg(test)]
mod tests;

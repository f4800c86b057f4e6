pub const APP_NAME: &str = "Perch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the widget-group contract implemented by this host.
pub const API_VERSION: &str = "1.0.0";

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
/// A plugin directory carrying this file is removed during the next discovery pass.
pub const DELETE_MARKER_FILE_NAME: &str = ".uninstall-pending";

/// Symbol every dynamically loaded module exports. See `declare_widget_group!`.
pub const REGISTER_SYMBOL: &[u8] = b"perch_register_widget_groups\0";

pub const SUPPORTED_LANGUAGES: &[&str] = &["rust"];

pub const DATA_DIR_ENV: &str = "PERCH_DATA_DIR";
pub const DEFAULT_DATA_DIR_NAME: &str = "perch";
pub const DEFAULT_PLUGINS_DIR: &str = "plugins";
pub const DEFAULT_SETTINGS_FILE: &str = "widgets.json";
pub const PLUGIN_DATA_DIR: &str = "plugin-data";

/// Bumped whenever the persisted widget document changes shape.
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_LOW_POWER_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_PROXY_ATTEMPTS: u32 = 3;

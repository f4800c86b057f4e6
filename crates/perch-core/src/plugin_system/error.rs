//! # Perch Core Plugin System Errors
//!
//! [`PluginSystemError`] covers discovery, validation and loading failures.
//! [`WidgetCallError`] is what the host sees when a call into a loaded
//! widget group fails or panics; it never escapes as a panic.
use std::path::PathBuf;

use crate::plugin_system::version::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Plugin manifest error for '{path}': {message}")]
    ManifestError {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Entry module '{}' of plugin '{plugin_id}' does not exist", path.display())]
    MissingEntryModule { plugin_id: String, path: PathBuf },

    #[error("Entry module '{entry_module}' of plugin '{plugin_id}' must be a relative path inside the plugin directory")]
    InvalidEntryModule {
        plugin_id: String,
        entry_module: String,
    },

    #[error("Plugin '{plugin_id}' is written in unsupported language '{language}'")]
    UnsupportedLanguage { plugin_id: String, language: String },

    #[error("Plugin '{plugin_id}' requires API '{required}', host provides '{host}'")]
    IncompatibleApi {
        plugin_id: String,
        required: String,
        host: String,
    },

    #[error("Plugin loading failed for '{plugin_id}': {source}")]
    LoadingError {
        plugin_id: String,
        path: Option<PathBuf>,
        #[source]
        source: Box<PluginSystemErrorSource>,
    },

    #[error("Entry module of plugin '{plugin_id}' registered no widget group")]
    NoWidgetGroup { plugin_id: String },

    #[error("Entry module of plugin '{plugin_id}' registered {count} widget groups, expected exactly one")]
    AmbiguousWidgetGroup { plugin_id: String, count: usize },

    #[error("Plugin initialization error for '{plugin_id}': {message}")]
    InitializationError { plugin_id: String, message: String },

    #[error("Plugin '{0}' is not loaded")]
    PluginNotLoaded(String),

    #[error("Plugin '{0}' is not known to this host")]
    UnknownPlugin(String),

    #[error("Plugin '{plugin_id}' does not provide widget type '{type_tag}'")]
    UnknownWidgetType { plugin_id: String, type_tag: String },

    #[error("Version parsing error: {0}")]
    VersionParsing(#[from] VersionError),

    #[error("Internal plugin system error: {0}")]
    InternalError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemErrorSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Dynamic library error: {0}")]
    Library(String),
    #[error("Panicked: {0}")]
    Panic(String),
    #[error("Other: {0}")]
    Other(String),
}

/// Error returned by widget-group implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct WidgetError(pub String);

impl From<String> for WidgetError {
    fn from(msg: String) -> Self {
        WidgetError(msg)
    }
}

impl From<&str> for WidgetError {
    fn from(msg: &str) -> Self {
        WidgetError(msg.to_string())
    }
}

impl From<serde_json::Error> for WidgetError {
    fn from(err: serde_json::Error) -> Self {
        WidgetError(err.to_string())
    }
}

pub type WidgetResult<T> = std::result::Result<T, WidgetError>;

/// Failure of a single call routed into a widget group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WidgetCallError {
    #[error("Plugin '{plugin_id}' panicked during '{operation}': {message}")]
    Panicked {
        plugin_id: String,
        operation: &'static str,
        message: String,
    },

    #[error("Plugin '{plugin_id}' failed during '{operation}': {source}")]
    Failed {
        plugin_id: String,
        operation: &'static str,
        #[source]
        source: WidgetError,
    },

    #[error("Plugin '{plugin_id}' does not provide widget type '{type_tag}'")]
    UnknownWidgetType { plugin_id: String, type_tag: String },
}

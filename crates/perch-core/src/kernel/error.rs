//! # Perch Core Kernel Errors
//!
//! Defines the top-level error type of the runtime.
//!
//! Every subsystem owns a typed error enum; [`Error`] aggregates them so the
//! host bootstrap and the binary can propagate failures with `?` regardless
//! of which subsystem raised them.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::lifecycle::error::LifecycleError;
use crate::plugin_system::error::PluginSystemError;
use crate::remote::error::ProxyError;
use crate::storage::error::StorageSystemError;
use crate::telemetry::error::TelemetryError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Remote provider error: {0}")]
    Proxy(#[from] ProxyError),

    /// Error occurring during a specific kernel lifecycle phase.
    #[error("Kernel lifecycle error during {phase:?}: {message}")]
    KernelLifecycleError {
        phase: KernelLifecyclePhase,
        component_name: Option<String>,
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Represents a specific phase in the kernel's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum KernelLifecyclePhase {
    #[error("Bootstrap")]
    Bootstrap,
    #[error("Initialize")]
    Initialize,
    #[error("Start")]
    Start,
    #[error("Shutdown")]
    Shutdown,
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::StorageSystem(StorageSystemError::io(source, operation, path))
    }

    pub(crate) fn lifecycle(
        phase: KernelLifecyclePhase,
        component_name: &str,
        source: Error,
    ) -> Self {
        Error::KernelLifecycleError {
            phase,
            component_name: Some(component_name.to_string()),
            message: format!("component '{}' failed", component_name),
            source: Some(Box::new(source)),
        }
    }
}

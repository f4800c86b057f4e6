pub mod kernel;
pub mod lifecycle;
pub mod plugin_system;
pub mod remote;
pub mod storage;
pub mod telemetry;

// Re-export key public types/traits for the binary and plugins
pub use kernel::{Host, HostBuilder};
pub use kernel::error::Error as KernelError;
pub use lifecycle::{DeleteConfirmation, DeleteOutcome, LifecycleController, WidgetState};
pub use plugin_system::{
    ContentHandle, ModuleRegistrar, PluginManifest, WidgetContent, WidgetContext, WidgetGroup,
    WidgetPluginManager, WidgetSettings,
};
pub use storage::{HostConfig, SettingsStore, WidgetInstance};
pub use telemetry::{HardwareDomain, TelemetryEngine};

#[cfg(test)]
mod tests;

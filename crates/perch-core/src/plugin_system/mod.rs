//! # Perch Core Plugin System
//!
//! Discovers widget plugins on disk, loads their entry modules and routes
//! host lifecycle calls into them.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`manifest`]**: Plugin metadata ([`PluginManifest`]) and widget type
//!   descriptors parsed from `manifest.json`.
//! - **[`version`]**: Lenient plugin version parsing and semver comparison.
//! - **[`resolver`]**: Directory scanning, validation and de-duplication
//!   ([`MetadataResolver`]).
//! - **[`loader`]**: Built-in and dynamic module loading with panic isolation
//!   ([`ModuleLoader`]).
//! - **[`traits`]**: The [`WidgetGroup`] contract plugins implement and the
//!   types crossing it.
//! - **[`registry`]**: Per-plugin live widget objects ([`PluginRegistry`]).
//! - **[`manager`]**: The [`WidgetPluginManager`] component tying the above
//!   together.
pub mod error;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod traits;
pub mod version;

pub(crate) mod guard;

pub use error::{PluginSystemError, WidgetCallError, WidgetError, WidgetResult};
pub use loader::{FailureNotifier, LoadFailure, LoadReport, LogFailureNotifier, ModuleLoader};
pub use manager::WidgetPluginManager;
pub use manifest::{ManifestBuilder, PluginManifest, WidgetSize, WidgetTypeDescriptor};
pub use registry::PluginRegistry;
pub use resolver::{MetadataResolver, Resolution, SkippedPlugin};
pub use traits::{
    ContentHandle, ModuleRegistrar, RegisterFn, SettingsChangedEvent, WidgetContent,
    WidgetContext, WidgetGroup, WidgetSettings, parse_settings_as,
};
pub use version::{PluginVersion, VersionRange};

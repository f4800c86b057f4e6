use std::any::Any;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::plugin_system::error::WidgetResult;
use crate::telemetry::TelemetryEngine;

/// Per-instance settings owned by a widget group.
///
/// Implemented automatically for any serializable, cloneable settings type,
/// so plugins only declare a plain struct.
pub trait WidgetSettings: Any + Debug + Send + Sync {
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn clone_settings(&self) -> Box<dyn WidgetSettings>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> WidgetSettings for T
where
    T: Serialize + Clone + Debug + Send + Sync + 'static,
{
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn clone_settings(&self) -> Box<dyn WidgetSettings> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn WidgetSettings {
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl Clone for Box<dyn WidgetSettings> {
    fn clone(&self) -> Self {
        self.clone_settings()
    }
}

/// Helper for `WidgetGroup::parse_settings` implementations.
pub fn parse_settings_as<T>(raw: &str) -> WidgetResult<Box<dyn WidgetSettings>>
where
    T: DeserializeOwned + Serialize + Clone + Debug + Send + Sync + 'static,
{
    let settings: T = serde_json::from_str(raw)?;
    Ok(Box::new(settings))
}

/// Live widget object handed to the window layer. Dropping the last handle
/// disposes it.
pub trait WidgetContent: Any + Debug + Send + Sync {
    fn instance_id(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

pub type ContentHandle = Arc<dyn WidgetContent>;

/// Delivered to the owning widget group whenever an instance's settings change.
#[derive(Debug)]
pub struct SettingsChangedEvent<'a> {
    pub instance_id: &'a str,
    pub type_tag: &'a str,
    pub settings: &'a dyn WidgetSettings,
}

/// Host services a widget group receives once, at initialization.
#[derive(Clone)]
pub struct WidgetContext {
    plugin_id: String,
    telemetry: Arc<TelemetryEngine>,
    power_mode: watch::Receiver<bool>,
    data_dir: PathBuf,
}

impl WidgetContext {
    pub fn new(plugin_id: &str, telemetry: Arc<TelemetryEngine>, data_dir: PathBuf) -> Self {
        let power_mode = telemetry.power_mode();
        Self {
            plugin_id: plugin_id.to_string(),
            telemetry,
            power_mode,
            data_dir,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn telemetry(&self) -> &Arc<TelemetryEngine> {
        &self.telemetry
    }

    /// Watch channel carrying `true` while the host is in low-power mode.
    pub fn power_mode(&self) -> watch::Receiver<bool> {
        self.power_mode.clone()
    }

    /// Directory reserved for this plugin's own files. Not created eagerly.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Debug for WidgetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetContext")
            .field("plugin_id", &self.plugin_id)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

/// Contract every plugin's entry module implements, exactly once.
///
/// Instance ids are opaque strings chosen by the host. Calls for one
/// instance are never issued concurrently; calls for different instances
/// may be.
pub trait WidgetGroup: Send + Sync {
    /// Called once after loading, before any other method.
    fn initialize(&self, context: WidgetContext) -> WidgetResult<()>;

    /// Creates the live widget object for an instance. The host only calls
    /// this when it holds no live object for `instance_id`.
    fn create_content(
        &self,
        instance_id: &str,
        type_tag: &str,
        settings: &dyn WidgetSettings,
    ) -> WidgetResult<ContentHandle>;

    /// The instance's window became visible.
    fn activate(&self, instance_id: &str) -> WidgetResult<()>;

    /// The instance's window was hidden.
    fn deactivate(&self, instance_id: &str) -> WidgetResult<()>;

    /// The instance was disabled and its live object released.
    fn unpin(&self, instance_id: &str) -> WidgetResult<()>;

    /// The instance was deleted; drop anything kept for it.
    fn delete(&self, instance_id: &str) -> WidgetResult<()>;

    fn default_settings(&self, type_tag: &str) -> WidgetResult<Box<dyn WidgetSettings>>;

    /// Decodes a persisted settings block.
    fn parse_settings(&self, type_tag: &str, raw: &str) -> WidgetResult<Box<dyn WidgetSettings>>;

    fn on_settings_changed(&self, event: &SettingsChangedEvent<'_>) -> WidgetResult<()>;

    /// Called before the group is unloaded.
    fn shutdown(&self) -> WidgetResult<()> {
        Ok(())
    }
}

type WidgetGroupFactory = Box<dyn FnOnce() -> WidgetResult<Box<dyn WidgetGroup>> + Send>;

/// Collects the widget groups an entry module registers.
#[derive(Default)]
pub struct ModuleRegistrar {
    factories: Vec<(String, WidgetGroupFactory)>,
}

impl ModuleRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: FnOnce() -> WidgetResult<Box<dyn WidgetGroup>> + Send + 'static,
    {
        self.factories.push((type_name.to_string(), Box::new(factory)));
    }

    pub fn register_default<G>(&mut self)
    where
        G: WidgetGroup + Default + 'static,
    {
        self.register(std::any::type_name::<G>(), || {
            Ok(Box::new(G::default()) as Box<dyn WidgetGroup>)
        });
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.factories.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub(crate) fn into_single(mut self) -> Result<(String, WidgetGroupFactory), usize> {
        match self.factories.len() {
            1 => self.factories.pop().ok_or(0),
            n => Err(n),
        }
    }
}

impl Debug for ModuleRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistrar")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Entry point of a widget module. Exported by dynamic modules under
/// [`REGISTER_SYMBOL`](crate::kernel::constants::REGISTER_SYMBOL) and handed
/// to the loader directly for built-in ones.
pub type RegisterFn = extern "C-unwind" fn(registrar: &mut ModuleRegistrar);

/// Exports the registration symbol for a widget group implementing `Default`.
///
/// ```ignore
/// perch_core::declare_widget_group!(MyWidgets);
/// ```
#[macro_export]
macro_rules! declare_widget_group {
    ($group:ty) => {
        #[unsafe(no_mangle)]
        pub extern "C-unwind" fn perch_register_widget_groups(
            registrar: &mut $crate::plugin_system::ModuleRegistrar,
        ) {
            registrar.register_default::<$group>();
        }
    };
}

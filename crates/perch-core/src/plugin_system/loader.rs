//! Turns resolved manifests into live widget groups.
//!
//! A module is either built into the host, registered under its plugin id,
//! or a dynamic library at the manifest's entry path exporting
//! [`REGISTER_SYMBOL`]. Libraries are opened with the platform default
//! (`RTLD_LOCAL` on Unix), so symbols of one plugin never satisfy another's.
//! Every call into module code runs under a panic boundary; a faulty module
//! fails its own load and nothing else.
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use libloading::{Library, Symbol};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::kernel::constants::REGISTER_SYMBOL;
use crate::plugin_system::error::{PluginSystemError, PluginSystemErrorSource};
use crate::plugin_system::guard::panic_message;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::traits::{ModuleRegistrar, RegisterFn, WidgetGroup};

/// A plugin that failed to load, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub plugin_id: String,
    pub path: Option<PathBuf>,
    pub reason: String,
}

/// Outcome of one discovery-and-load pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub disabled: Vec<String>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record_failure(&mut self, plugin_id: &str, path: Option<PathBuf>, err: &dyn fmt::Display) {
        self.failures.push(LoadFailure {
            plugin_id: plugin_id.to_string(),
            path,
            reason: err.to_string(),
        });
    }

    /// Human-readable summary listing each failed plugin.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .failures
            .iter()
            .map(|f| format!("  {}: {}", f.plugin_id, f.reason))
            .collect();
        Some(format!(
            "{} plugin(s) failed to load:\n{}",
            self.failures.len(),
            lines.join("\n")
        ))
    }
}

/// Receives the aggregated load failures, once per discovery pass.
pub trait FailureNotifier: Send + Sync {
    fn notify_load_failures(&self, report: &LoadReport);
}

/// Default notifier: writes the summary to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureNotifier;

impl FailureNotifier for LogFailureNotifier {
    fn notify_load_failures(&self, report: &LoadReport) {
        if let Some(summary) = report.failure_summary() {
            warn!("{}", summary);
        }
    }
}

/// Loads widget modules. Opened libraries stay mapped for the lifetime of
/// the loader, since content handles created by a module may outlive its
/// widget group.
#[derive(Default)]
pub struct ModuleLoader {
    builtins: RwLock<HashMap<String, RegisterFn>>,
    libraries: Mutex<Vec<Arc<Library>>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module compiled into the host. Takes precedence over any
    /// entry module on disk for the same plugin id.
    pub fn register_builtin(&self, plugin_id: &str, register: RegisterFn) {
        self.builtins.write().insert(plugin_id.to_string(), register);
    }

    pub fn is_builtin(&self, plugin_id: &str) -> bool {
        self.builtins.read().contains_key(plugin_id)
    }

    /// Loads the module for `manifest` and instantiates its single widget group.
    pub fn load(&self, manifest: &PluginManifest) -> Result<Box<dyn WidgetGroup>, PluginSystemError> {
        let builtin = self.builtins.read().get(&manifest.id).copied();
        let register = match builtin {
            Some(register) => register,
            None => self.open_dynamic(manifest)?,
        };

        let mut registrar = ModuleRegistrar::new();
        panic::catch_unwind(AssertUnwindSafe(|| register(&mut registrar))).map_err(|payload| {
            PluginSystemError::LoadingError {
                plugin_id: manifest.id.clone(),
                path: Some(manifest.entry_module_path()),
                source: Box::new(PluginSystemErrorSource::Panic(panic_message(payload.as_ref()))),
            }
        })?;

        let (type_name, factory) = registrar.into_single().map_err(|count| match count {
            0 => PluginSystemError::NoWidgetGroup {
                plugin_id: manifest.id.clone(),
            },
            count => PluginSystemError::AmbiguousWidgetGroup {
                plugin_id: manifest.id.clone(),
                count,
            },
        })?;
        debug!("Instantiating widget group '{}' for plugin '{}'", type_name, manifest.id);

        match panic::catch_unwind(AssertUnwindSafe(factory)) {
            Ok(Ok(group)) => Ok(group),
            Ok(Err(e)) => Err(PluginSystemError::InitializationError {
                plugin_id: manifest.id.clone(),
                message: format!("Failed to construct widget group '{}': {}", type_name, e),
            }),
            Err(payload) => Err(PluginSystemError::InitializationError {
                plugin_id: manifest.id.clone(),
                message: format!(
                    "Widget group '{}' panicked during construction: {}",
                    type_name,
                    panic_message(payload.as_ref())
                ),
            }),
        }
    }

    /// Loads every manifest, collecting failures instead of stopping at the
    /// first one.
    pub fn load_all(
        &self,
        manifests: Vec<PluginManifest>,
    ) -> (Vec<(PluginManifest, Box<dyn WidgetGroup>)>, LoadReport) {
        let mut loaded = Vec::new();
        let mut report = LoadReport::default();
        for manifest in manifests {
            match self.load(&manifest) {
                Ok(group) => {
                    info!("Loaded widget plugin '{}' v{}", manifest.id, manifest.version);
                    report.loaded.push(manifest.id.clone());
                    loaded.push((manifest, group));
                }
                Err(e) => {
                    warn!("Failed to load widget plugin '{}': {}", manifest.id, e);
                    let path = (!self.is_builtin(&manifest.id)).then(|| manifest.entry_module_path());
                    report.record_failure(&manifest.id, path, &e);
                }
            }
        }
        (loaded, report)
    }

    fn open_dynamic(&self, manifest: &PluginManifest) -> Result<RegisterFn, PluginSystemError> {
        if !manifest.has_safe_entry_module() {
            return Err(PluginSystemError::InvalidEntryModule {
                plugin_id: manifest.id.clone(),
                entry_module: manifest.entry_module.clone(),
            });
        }
        let lib_path = manifest.entry_module_path();

        // SAFETY: loading a library runs its initializers; plugin libraries are
        // trusted to the same degree as the host binary.
        let library = unsafe { Library::new(&lib_path) }.map_err(|e| PluginSystemError::LoadingError {
            plugin_id: manifest.id.clone(),
            path: Some(lib_path.clone()),
            source: Box::new(PluginSystemErrorSource::Library(e.to_string())),
        })?;

        let register: RegisterFn = {
            // SAFETY: the symbol type matches what `declare_widget_group!` exports.
            let symbol: Symbol<RegisterFn> = unsafe { library.get(REGISTER_SYMBOL) }.map_err(|e| {
                PluginSystemError::LoadingError {
                    plugin_id: manifest.id.clone(),
                    path: Some(lib_path.clone()),
                    source: Box::new(PluginSystemErrorSource::Library(format!(
                        "missing registration symbol: {}",
                        e
                    ))),
                }
            })?;
            *symbol
        };

        self.libraries.lock().push(Arc::new(library));
        Ok(register)
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("builtins", &self.builtins.read().keys().cloned().collect::<Vec<_>>())
            .field("libraries", &self.libraries.lock().len())
            .finish()
    }
}

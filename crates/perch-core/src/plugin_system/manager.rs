use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result as KernelResult;
use crate::plugin_system::error::{PluginSystemError, WidgetCallError};
use crate::plugin_system::loader::{FailureNotifier, LoadReport, LogFailureNotifier, ModuleLoader};
use crate::plugin_system::manifest::{PluginManifest, WidgetTypeDescriptor};
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::resolver::{MetadataResolver, deduplicate};
use crate::plugin_system::traits::{RegisterFn, WidgetContext, WidgetGroup, WidgetSettings};
use crate::storage::settings::SettingsResolver;
use crate::telemetry::TelemetryEngine;

/// Owns plugin discovery, loading and the per-plugin registries.
pub struct WidgetPluginManager {
    name: &'static str,
    resolver: MetadataResolver,
    loader: Arc<ModuleLoader>,
    plugin_dirs: Vec<PathBuf>,
    plugin_data_root: PathBuf,
    telemetry: Arc<TelemetryEngine>,
    notifier: Arc<dyn FailureNotifier>,
    builtins: RwLock<Vec<PluginManifest>>,
    known: RwLock<BTreeMap<String, PluginManifest>>,
    registries: RwLock<HashMap<String, Arc<PluginRegistry>>>,
    last_report: Mutex<LoadReport>,
}

impl WidgetPluginManager {
    pub fn new(
        plugin_dirs: Vec<PathBuf>,
        plugin_data_root: PathBuf,
        telemetry: Arc<TelemetryEngine>,
    ) -> Self {
        Self {
            name: "WidgetPluginManager",
            resolver: MetadataResolver::default(),
            loader: Arc::new(ModuleLoader::new()),
            plugin_dirs,
            plugin_data_root,
            telemetry,
            notifier: Arc::new(LogFailureNotifier),
            builtins: RwLock::new(Vec::new()),
            known: RwLock::new(BTreeMap::new()),
            registries: RwLock::new(HashMap::new()),
            last_report: Mutex::new(LoadReport::default()),
        }
    }

    pub fn with_resolver(mut self, resolver: MetadataResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Makes a module compiled into the host available under `manifest.id`.
    /// It takes part in the next discovery pass like any discovered plugin.
    pub fn register_builtin(&self, manifest: PluginManifest, register: RegisterFn) {
        self.loader.register_builtin(&manifest.id, register);
        let mut builtins = self.builtins.write();
        builtins.retain(|m| m.id != manifest.id);
        builtins.push(manifest);
    }

    /// Runs a discovery pass and loads every enabled plugin not loaded yet.
    /// Load failures are collected into the report, which is handed to the
    /// failure notifier once if anything failed.
    pub async fn discover_and_load(&self) -> Result<LoadReport, PluginSystemError> {
        let resolution = self.resolver.resolve(&self.plugin_dirs).await;
        let mut report = LoadReport::default();
        for skipped in &resolution.skipped {
            let id = skipped
                .dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| skipped.dir.display().to_string());
            report.record_failure(&id, Some(skipped.dir.clone()), &skipped.reason);
        }

        let mut candidates = resolution.manifests;
        for manifest in self.builtins.read().iter() {
            match self.resolver.validate(manifest, false) {
                Ok(()) => candidates.push(manifest.clone()),
                Err(e) => report.record_failure(&manifest.id, None, &e),
            }
        }
        let (unique, _discarded) = deduplicate(candidates);

        let mut to_load = Vec::new();
        {
            let loaded = self.registries.read();
            let mut known = self.known.write();
            for manifest in unique {
                known.insert(manifest.id.clone(), manifest.clone());
                if manifest.disabled {
                    info!("Plugin '{}' is disabled, not loading", manifest.id);
                    report.disabled.push(manifest.id.clone());
                } else if !loaded.contains_key(&manifest.id) {
                    to_load.push(manifest);
                }
            }
        }

        let loader = self.loader.clone();
        let (groups, load_report) = tokio::task::spawn_blocking(move || loader.load_all(to_load))
            .await
            .map_err(|e| PluginSystemError::InternalError(format!("plugin loading task failed: {}", e)))?;
        report.failures.extend(load_report.failures);

        for (manifest, group) in groups {
            let id = manifest.id.clone();
            match self.install(manifest, group) {
                Ok(()) => report.loaded.push(id),
                Err(e) => report.record_failure(&id, None, &e),
            }
        }

        if !report.is_clean() {
            self.notifier.notify_load_failures(&report);
        }
        *self.last_report.lock() = report.clone();
        Ok(report)
    }

    /// Loads one known plugin at runtime, ignoring its `disabled` flag.
    pub async fn load_plugin(&self, plugin_id: &str) -> Result<(), PluginSystemError> {
        if self.is_loaded(plugin_id) {
            return Ok(());
        }
        let manifest = self
            .manifest(plugin_id)
            .ok_or_else(|| PluginSystemError::UnknownPlugin(plugin_id.to_string()))?;
        let loader = self.loader.clone();
        let load_manifest = manifest.clone();
        let group = tokio::task::spawn_blocking(move || loader.load(&load_manifest))
            .await
            .map_err(|e| PluginSystemError::InternalError(format!("plugin loading task failed: {}", e)))??;
        self.install(manifest, group)
            .map_err(|e| PluginSystemError::InitializationError {
                plugin_id: plugin_id.to_string(),
                message: e.to_string(),
            })
    }

    /// Unloads a plugin at runtime. Returns the ids of the instances whose
    /// live objects were disposed.
    pub fn unload_plugin(&self, plugin_id: &str) -> Result<Vec<String>, PluginSystemError> {
        let registry = self
            .registries
            .write()
            .remove(plugin_id)
            .ok_or_else(|| PluginSystemError::PluginNotLoaded(plugin_id.to_string()))?;
        let (released, result) = registry.shutdown();
        if let Err(e) = result {
            warn!("Plugin '{}' failed to shut down cleanly: {}", plugin_id, e);
        }
        info!("Unloaded plugin '{}'", plugin_id);
        Ok(released)
    }

    pub fn registry(&self, plugin_id: &str) -> Option<Arc<PluginRegistry>> {
        self.registries.read().get(plugin_id).cloned()
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.registries.read().contains_key(plugin_id)
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn manifest(&self, plugin_id: &str) -> Option<PluginManifest> {
        self.known.read().get(plugin_id).cloned()
    }

    /// Every manifest seen by discovery, loaded or not, sorted by id.
    pub fn manifests(&self) -> Vec<PluginManifest> {
        self.known.read().values().cloned().collect()
    }

    pub fn last_report(&self) -> LoadReport {
        self.last_report.lock().clone()
    }

    /// Looks up a widget type on a loaded plugin.
    pub fn widget_type(&self, plugin_id: &str, type_tag: &str) -> Result<WidgetTypeDescriptor, PluginSystemError> {
        let registry = self
            .registry(plugin_id)
            .ok_or_else(|| PluginSystemError::PluginNotLoaded(plugin_id.to_string()))?;
        registry
            .manifest()
            .widget_type(type_tag)
            .cloned()
            .ok_or_else(|| PluginSystemError::UnknownWidgetType {
                plugin_id: plugin_id.to_string(),
                type_tag: type_tag.to_string(),
            })
    }

    pub fn shutdown_all(&self) {
        let registries: Vec<Arc<PluginRegistry>> =
            self.registries.write().drain().map(|(_, r)| r).collect();
        for registry in registries {
            if let (_, Err(e)) = registry.shutdown() {
                warn!("Plugin '{}' failed to shut down cleanly: {}", registry.plugin_id(), e);
            }
        }
    }

    fn install(&self, manifest: PluginManifest, group: Box<dyn WidgetGroup>) -> Result<(), WidgetCallError> {
        let context = WidgetContext::new(
            &manifest.id,
            self.telemetry.clone(),
            self.plugin_data_root.join(&manifest.id),
        );
        let registry = Arc::new(PluginRegistry::new(manifest, group));
        if let Err(e) = registry.initialize(context) {
            warn!("Plugin '{}' failed to initialize: {}", registry.plugin_id(), e);
            return Err(e);
        }
        self.registries
            .write()
            .insert(registry.plugin_id().to_string(), registry);
        Ok(())
    }
}

impl SettingsResolver for WidgetPluginManager {
    fn resolve_settings(
        &self,
        plugin_id: &str,
        type_tag: &str,
        raw: &str,
    ) -> Option<Result<Box<dyn WidgetSettings>, WidgetCallError>> {
        let registry = self.registry(plugin_id)?;
        Some(registry.parse_settings(type_tag, raw))
    }
}

impl Debug for WidgetPluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetPluginManager")
            .field("name", &self.name)
            .field("plugin_dirs", &self.plugin_dirs)
            .field("loaded", &self.loaded_plugins())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelComponent for WidgetPluginManager {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> KernelResult<()> {
        let report = self.discover_and_load().await?;
        info!(
            "Plugin manager ready: {} loaded, {} disabled, {} failed",
            report.loaded.len(),
            report.disabled.len(),
            report.failures.len()
        );
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        self.shutdown_all();
        Ok(())
    }
}

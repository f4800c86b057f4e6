//! Drives widget instances through their lifecycle.
//!
//! The controller is the only writer of host-side instance state. It
//! persists through [`SettingsStore`] and routes calls into the owning
//! plugin's [`PluginRegistry`](crate::plugin_system::PluginRegistry).
//! Transitions on one instance are serialized; different instances proceed
//! independently. Plugin callback failures are logged and never stop a
//! transition from completing on the host side.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result as KernelResult;
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::state::{LifecycleAction, WidgetState};
use crate::plugin_system::manager::WidgetPluginManager;
use crate::plugin_system::manifest::WidgetTypeDescriptor;
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::traits::{ContentHandle, WidgetSettings};
use crate::storage::settings::{Placement, SettingsBlob, SettingsStore, WidgetInstance};

/// Asks the user whether a widget may be deleted.
#[async_trait]
pub trait DeleteConfirmation: Send + Sync {
    async fn confirm_delete(&self, instance: &WidgetInstance) -> bool;
}

/// Confirms every deletion.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConfirm;

#[async_trait]
impl DeleteConfirmation for AlwaysConfirm {
    async fn confirm_delete(&self, _instance: &WidgetInstance) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The user declined; nothing changed.
    Cancelled,
}

pub struct LifecycleController {
    name: &'static str,
    plugins: Arc<WidgetPluginManager>,
    store: Arc<SettingsStore>,
    confirmation: Arc<dyn DeleteConfirmation>,
    states: RwLock<HashMap<String, WidgetState>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    issued_ids: Mutex<HashSet<String>>,
}

impl LifecycleController {
    pub fn new(
        plugins: Arc<WidgetPluginManager>,
        store: Arc<SettingsStore>,
        confirmation: Arc<dyn DeleteConfirmation>,
    ) -> Self {
        Self {
            name: "LifecycleController",
            plugins,
            store,
            confirmation,
            states: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            issued_ids: Mutex::new(HashSet::new()),
        }
    }

    /// Loads persisted instances and derives their initial state from the
    /// pinned flag. Plugins should be loaded first so their settings decode.
    pub async fn restore(&self) -> Result<Vec<WidgetInstance>, LifecycleError> {
        let instances = self.store.load_all(self.plugins.as_ref()).await?;
        let mut states = self.states.write();
        states.clear();
        for instance in &instances {
            states.insert(instance.id.clone(), WidgetState::from_pinned(instance.pinned));
        }
        Ok(instances)
    }

    pub fn state(&self, instance_id: &str) -> Option<WidgetState> {
        self.states.read().get(instance_id).copied()
    }

    pub fn instances(&self) -> Vec<(WidgetInstance, WidgetState)> {
        let states = self.states.read();
        self.store
            .instances()
            .into_iter()
            .filter_map(|i| states.get(&i.id).copied().map(|s| (i, s)))
            .collect()
    }

    /// Widget types offered by loaded plugins, sorted by plugin id.
    pub fn available_widget_types(&self) -> Vec<(String, WidgetTypeDescriptor)> {
        self.plugins
            .loaded_plugins()
            .into_iter()
            .filter_map(|id| self.plugins.registry(&id))
            .flat_map(|registry| {
                let id = registry.plugin_id().to_string();
                registry
                    .manifest()
                    .widgets
                    .iter()
                    .map(|w| (id.clone(), w.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Creates a pinned, enabled instance of a widget type offered by a
    /// loaded plugin, with the plugin's default settings.
    pub async fn add_widget(
        &self,
        plugin_id: &str,
        type_tag: &str,
        placement: Option<Placement>,
    ) -> Result<WidgetInstance, LifecycleError> {
        let registry = self
            .plugins
            .registry(plugin_id)
            .ok_or_else(|| LifecycleError::PluginNotLoaded(plugin_id.to_string()))?;
        let descriptor = registry.manifest().widget_type(type_tag).cloned().ok_or_else(|| {
            warn!("Plugin '{}' offers no widget type '{}'", plugin_id, type_tag);
            LifecycleError::UnknownWidgetType {
                plugin_id: plugin_id.to_string(),
                type_tag: type_tag.to_string(),
            }
        })?;

        let settings = match registry.default_settings(type_tag) {
            Ok(settings) => SettingsBlob::Typed(settings),
            Err(e) => {
                warn!("Using empty settings for new '{}' widget: {}", type_tag, e);
                SettingsBlob::typed(serde_json::Value::Object(serde_json::Map::new()))
            }
        };
        let instance = WidgetInstance {
            id: self.issue_id(),
            plugin_id: plugin_id.to_string(),
            type_tag: type_tag.to_string(),
            pinned: true,
            placement: Some(placement.unwrap_or(Placement {
                x: 0,
                y: 0,
                width: descriptor.default_size.width,
                height: descriptor.default_size.height,
            })),
            settings,
        };

        let next = Self::next_state(&instance.id, WidgetState::Discovered, LifecycleAction::Add)?;
        self.store.upsert(instance.clone()).await?;
        self.states.write().insert(instance.id.clone(), next);
        info!("Added widget '{}' ({}:{})", instance.id, plugin_id, type_tag);
        Ok(instance)
    }

    /// The instance's window became visible. Creates its live object if
    /// needed and activates it. Returns the content handle, or `None` when
    /// the plugin could not provide one.
    pub async fn window_shown(&self, instance_id: &str) -> Result<Option<ContentHandle>, LifecycleError> {
        let gate = self.gate(instance_id);
        let _serial = gate.lock().await;

        let from = self.current_state(instance_id)?;
        let next = Self::next_state(instance_id, from, LifecycleAction::WindowShown)?;
        let instance = self.instance(instance_id)?;
        let registry = self.plugins.registry(&instance.plugin_id);
        if from == WidgetState::Active {
            return Ok(registry.and_then(|r| r.live_content(instance_id)));
        }

        let content = match registry {
            Some(registry) => {
                let settings = Self::content_settings(&registry, &instance);
                let content = registry
                    .create_content(instance_id, &instance.type_tag, settings.as_ref())
                    .map_err(|e| warn!("Widget '{}' has no content: {}", instance_id, e))
                    .ok();
                if let Err(e) = registry.activate(instance_id) {
                    warn!("Activating widget '{}' failed: {}", instance_id, e);
                }
                content
            }
            None => {
                warn!(
                    "Plugin '{}' of widget '{}' is not loaded, showing it without content",
                    instance.plugin_id, instance_id
                );
                None
            }
        };
        self.set_state(instance_id, next);
        Ok(content)
    }

    pub async fn window_hidden(&self, instance_id: &str) -> Result<(), LifecycleError> {
        let gate = self.gate(instance_id);
        let _serial = gate.lock().await;

        let from = self.current_state(instance_id)?;
        let next = Self::next_state(instance_id, from, LifecycleAction::WindowHidden)?;
        if from == WidgetState::Inactive {
            return Ok(());
        }
        let instance = self.instance(instance_id)?;
        if let Some(registry) = self.plugins.registry(&instance.plugin_id) {
            if let Err(e) = registry.deactivate(instance_id) {
                warn!("Deactivating widget '{}' failed: {}", instance_id, e);
            }
        }
        self.set_state(instance_id, next);
        Ok(())
    }

    /// Disables an instance: persists `pinned = false` and releases its live object.
    pub async fn disable(&self, instance_id: &str) -> Result<(), LifecycleError> {
        let gate = self.gate(instance_id);
        let _serial = gate.lock().await;

        let from = self.current_state(instance_id)?;
        let next = Self::next_state(instance_id, from, LifecycleAction::Disable)?;
        if from == WidgetState::Disabled {
            return Ok(());
        }
        let instance = self.store.update(instance_id, |i| i.pinned = false).await?;
        if let Some(registry) = self.plugins.registry(&instance.plugin_id) {
            if from == WidgetState::Active {
                if let Err(e) = registry.deactivate(instance_id) {
                    warn!("Deactivating widget '{}' failed: {}", instance_id, e);
                }
            }
            if let Err(e) = registry.unpin(instance_id) {
                warn!("Unpinning widget '{}' failed: {}", instance_id, e);
            }
        }
        self.set_state(instance_id, next);
        info!("Disabled widget '{}'", instance_id);
        Ok(())
    }

    pub async fn enable(&self, instance_id: &str) -> Result<(), LifecycleError> {
        let gate = self.gate(instance_id);
        let _serial = gate.lock().await;

        let from = self.current_state(instance_id)?;
        let next = Self::next_state(instance_id, from, LifecycleAction::Enable)?;
        if from != WidgetState::Disabled {
            return Ok(());
        }
        self.store.update(instance_id, |i| i.pinned = true).await?;
        self.set_state(instance_id, next);
        info!("Enabled widget '{}'", instance_id);
        Ok(())
    }

    /// Deletes an instance after the user confirms. A declined confirmation
    /// leaves the record and live object untouched.
    pub async fn delete(&self, instance_id: &str) -> Result<DeleteOutcome, LifecycleError> {
        let gate = self.gate(instance_id);
        let _serial = gate.lock().await;

        let from = self.current_state(instance_id)?;
        Self::next_state(instance_id, from, LifecycleAction::Delete)?;
        let instance = self.instance(instance_id)?;
        if !self.confirmation.confirm_delete(&instance).await {
            info!("Deletion of widget '{}' cancelled", instance_id);
            return Ok(DeleteOutcome::Cancelled);
        }

        self.store.remove(instance_id).await?;
        if let Some(registry) = self.plugins.registry(&instance.plugin_id) {
            if let Err(e) = registry.delete(instance_id) {
                warn!("Plugin cleanup for deleted widget '{}' failed: {}", instance_id, e);
            }
        }
        self.states.write().remove(instance_id);
        self.gates.lock().remove(instance_id);
        info!("Deleted widget '{}'", instance_id);
        Ok(DeleteOutcome::Deleted)
    }

    /// Replaces an instance's settings, persists them and notifies the plugin.
    pub async fn update_settings(
        &self,
        instance_id: &str,
        settings: Box<dyn WidgetSettings>,
    ) -> Result<(), LifecycleError> {
        let gate = self.gate(instance_id);
        let _serial = gate.lock().await;

        let from = self.current_state(instance_id)?;
        Self::next_state(instance_id, from, LifecycleAction::UpdateSettings)?;
        let instance = self.instance(instance_id)?;
        let registry = self.loaded_registry(&instance.plugin_id)?;

        self.store
            .save_one(instance_id, SettingsBlob::Typed(settings.clone_settings()))
            .await?;
        if let Err(e) = registry.notify_settings_changed(instance_id, &instance.type_tag, settings.as_ref()) {
            warn!("Plugin rejected settings change for widget '{}': {}", instance_id, e);
        }
        debug!("Updated settings of widget '{}'", instance_id);
        Ok(())
    }

    /// Like [`update_settings`](Self::update_settings), decoding `raw` JSON
    /// with the owning plugin first.
    pub async fn update_settings_json(&self, instance_id: &str, raw: &str) -> Result<(), LifecycleError> {
        let instance = self.instance(instance_id)?;
        let registry = self.loaded_registry(&instance.plugin_id)?;
        let settings = registry.parse_settings(&instance.type_tag, raw)?;
        self.update_settings(instance_id, settings).await
    }

    /// Unloads a plugin at runtime. Its visible widgets are deactivated,
    /// their live objects released and their settings kept verbatim from
    /// then on. Returns the ids of the affected instances.
    pub async fn disable_plugin(&self, plugin_id: &str) -> Result<Vec<String>, LifecycleError> {
        let registry = self.loaded_registry(plugin_id)?;
        let affected: Vec<String> = self
            .store
            .instances_of(plugin_id)
            .into_iter()
            .map(|i| i.id)
            .collect();
        for instance_id in &affected {
            let gate = self.gate(instance_id);
            let _serial = gate.lock().await;
            if self.state(instance_id) == Some(WidgetState::Active) {
                if let Err(e) = registry.deactivate(instance_id) {
                    warn!("Deactivating widget '{}' failed: {}", instance_id, e);
                }
                self.set_state(instance_id, WidgetState::Inactive);
            }
        }
        drop(registry);

        self.plugins.unload_plugin(plugin_id)?;
        let demoted = self.store.demote_plugin(plugin_id).await;
        info!(
            "Disabled plugin '{}': {} widget(s) affected, {} settings block(s) preserved",
            plugin_id,
            affected.len(),
            demoted
        );
        Ok(affected)
    }

    /// Loads a previously unloaded plugin and decodes its widgets' settings.
    pub async fn enable_plugin(&self, plugin_id: &str) -> Result<(), LifecycleError> {
        self.plugins.load_plugin(plugin_id).await?;
        let promoted = self.store.promote_plugin(plugin_id, self.plugins.as_ref()).await;
        info!("Enabled plugin '{}': {} settings block(s) decoded", plugin_id, promoted);
        Ok(())
    }

    fn content_settings(registry: &PluginRegistry, instance: &WidgetInstance) -> Box<dyn WidgetSettings> {
        if let Some(settings) = instance.settings.as_typed() {
            return settings.clone_settings();
        }
        match registry.default_settings(&instance.type_tag) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("No usable settings for widget '{}': {}", instance.id, e);
                Box::new(serde_json::Value::Object(serde_json::Map::new()))
            }
        }
    }

    fn loaded_registry(&self, plugin_id: &str) -> Result<Arc<PluginRegistry>, LifecycleError> {
        self.plugins
            .registry(plugin_id)
            .ok_or_else(|| LifecycleError::PluginNotLoaded(plugin_id.to_string()))
    }

    fn instance(&self, instance_id: &str) -> Result<WidgetInstance, LifecycleError> {
        self.store
            .get(instance_id)
            .ok_or_else(|| LifecycleError::UnknownInstance(instance_id.to_string()))
    }

    fn current_state(&self, instance_id: &str) -> Result<WidgetState, LifecycleError> {
        self.state(instance_id)
            .ok_or_else(|| LifecycleError::UnknownInstance(instance_id.to_string()))
    }

    fn next_state(
        instance_id: &str,
        from: WidgetState,
        action: LifecycleAction,
    ) -> Result<WidgetState, LifecycleError> {
        from.transition(action).ok_or_else(|| LifecycleError::InvalidTransition {
            instance_id: instance_id.to_string(),
            from,
            action,
        })
    }

    fn set_state(&self, instance_id: &str, state: WidgetState) {
        self.states.write().insert(instance_id.to_string(), state);
    }

    fn gate(&self, instance_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.gates
            .lock()
            .entry(instance_id.to_string())
            .or_default()
            .clone()
    }

    fn issue_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if self.store.get(&id).is_none() && self.issued_ids.lock().insert(id.clone()) {
                return id;
            }
        }
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("name", &self.name)
            .field("instances", &self.states.read().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KernelComponent for LifecycleController {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> KernelResult<()> {
        let instances = self.restore().await?;
        info!("Restored {} widget instance(s)", instances.len());
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        let active: Vec<String> = self
            .states
            .read()
            .iter()
            .filter(|(_, s)| **s == WidgetState::Active)
            .map(|(id, _)| id.clone())
            .collect();
        for instance_id in active {
            if let Err(e) = self.window_hidden(&instance_id).await {
                warn!("Failed to deactivate widget '{}' during shutdown: {}", instance_id, e);
            }
        }
        Ok(())
    }
}

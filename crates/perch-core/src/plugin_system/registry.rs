//! Per-plugin registry of live widget objects.
//!
//! One `PluginRegistry` exists per loaded plugin. It owns the plugin's
//! widget group and the live content objects keyed by instance id, and
//! routes lifecycle calls to the group. The instance map lock is never held
//! while plugin code runs. Calls for the same instance are ordered by a
//! per-instance gate, so settings notifications arrive in the order the
//! host issued them.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::plugin_system::error::WidgetCallError;
use crate::plugin_system::guard::guarded;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::traits::{
    ContentHandle, SettingsChangedEvent, WidgetContext, WidgetGroup, WidgetSettings,
};

pub struct PluginRegistry {
    manifest: PluginManifest,
    group: Box<dyn WidgetGroup>,
    live: Mutex<HashMap<String, ContentHandle>>,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PluginRegistry {
    pub fn new(manifest: PluginManifest, group: Box<dyn WidgetGroup>) -> Self {
        Self {
            manifest,
            group,
            live: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.manifest.id
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn initialize(&self, context: WidgetContext) -> Result<(), WidgetCallError> {
        guarded(self.plugin_id(), "initialize", || self.group.initialize(context))
    }

    /// Returns the live object for `instance_id`, creating it when none
    /// exists. Repeated calls return the same handle.
    pub fn create_content(
        &self,
        instance_id: &str,
        type_tag: &str,
        settings: &dyn WidgetSettings,
    ) -> Result<ContentHandle, WidgetCallError> {
        let gate = self.gate(instance_id);
        let _ordered = gate.lock();

        if let Some(existing) = self.live.lock().get(instance_id) {
            return Ok(existing.clone());
        }
        if self.manifest.widget_type(type_tag).is_none() {
            return Err(WidgetCallError::UnknownWidgetType {
                plugin_id: self.manifest.id.clone(),
                type_tag: type_tag.to_string(),
            });
        }

        let content = guarded(self.plugin_id(), "create_content", || {
            self.group.create_content(instance_id, type_tag, settings)
        })?;
        debug!("Created live widget '{}' ({}:{})", instance_id, self.manifest.id, type_tag);
        self.live.lock().insert(instance_id.to_string(), content.clone());
        Ok(content)
    }

    pub fn activate(&self, instance_id: &str) -> Result<(), WidgetCallError> {
        let gate = self.gate(instance_id);
        let _ordered = gate.lock();
        guarded(self.plugin_id(), "activate", || self.group.activate(instance_id))
    }

    pub fn deactivate(&self, instance_id: &str) -> Result<(), WidgetCallError> {
        let gate = self.gate(instance_id);
        let _ordered = gate.lock();
        guarded(self.plugin_id(), "deactivate", || self.group.deactivate(instance_id))
    }

    /// Disposes the live object, then tells the group. The object is gone
    /// even when the group fails.
    pub fn unpin(&self, instance_id: &str) -> Result<(), WidgetCallError> {
        let gate = self.gate(instance_id);
        let _ordered = gate.lock();
        let released = self.live.lock().remove(instance_id);
        drop(released);
        guarded(self.plugin_id(), "unpin", || self.group.unpin(instance_id))
    }

    pub fn delete(&self, instance_id: &str) -> Result<(), WidgetCallError> {
        let gate = self.gate(instance_id);
        let result = {
            let _ordered = gate.lock();
            let released = self.live.lock().remove(instance_id);
            drop(released);
            guarded(self.plugin_id(), "delete", || self.group.delete(instance_id))
        };
        self.gates.lock().remove(instance_id);
        result
    }

    pub fn notify_settings_changed(
        &self,
        instance_id: &str,
        type_tag: &str,
        settings: &dyn WidgetSettings,
    ) -> Result<(), WidgetCallError> {
        let gate = self.gate(instance_id);
        let _ordered = gate.lock();
        let event = SettingsChangedEvent {
            instance_id,
            type_tag,
            settings,
        };
        guarded(self.plugin_id(), "on_settings_changed", || {
            self.group.on_settings_changed(&event)
        })
    }

    pub fn default_settings(&self, type_tag: &str) -> Result<Box<dyn WidgetSettings>, WidgetCallError> {
        guarded(self.plugin_id(), "default_settings", || {
            self.group.default_settings(type_tag)
        })
    }

    pub fn parse_settings(&self, type_tag: &str, raw: &str) -> Result<Box<dyn WidgetSettings>, WidgetCallError> {
        guarded(self.plugin_id(), "parse_settings", || {
            self.group.parse_settings(type_tag, raw)
        })
    }

    pub fn live_content(&self, instance_id: &str) -> Option<ContentHandle> {
        self.live.lock().get(instance_id).cloned()
    }

    pub fn live_instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops every live object and shuts the group down. Returns the ids
    /// whose live objects were released.
    pub fn shutdown(&self) -> (Vec<String>, Result<(), WidgetCallError>) {
        let released: Vec<(String, ContentHandle)> = self.live.lock().drain().collect();
        let ids = released.iter().map(|(id, _)| id.clone()).collect();
        drop(released);
        self.gates.lock().clear();
        (ids, guarded(self.plugin_id(), "shutdown", || self.group.shutdown()))
    }

    fn gate(&self, instance_id: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .entry(instance_id.to_string())
            .or_default()
            .clone()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugin_id", &self.manifest.id)
            .field("live", &self.live_instances())
            .finish_non_exhaustive()
    }
}

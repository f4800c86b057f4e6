//! Digital clock widgets.
//!
//! Linked into the `perch` binary as a built-in plugin, or built on its own
//! with the `dynamic` feature into a `cdylib` the host loads from a plugin
//! directory holding `manifest.json`.
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use perch_core::plugin_system::version::VersionError;
use perch_core::plugin_system::{
    ContentHandle, ManifestBuilder, ModuleRegistrar, PluginManifest, PluginVersion, SettingsChangedEvent,
    VersionRange, WidgetContent, WidgetContext, WidgetError, WidgetGroup, WidgetResult, WidgetSettings, WidgetSize,
    WidgetTypeDescriptor, parse_settings_as,
};

pub const PLUGIN_ID: &str = "clock-widgets";
pub const DIGITAL_CLOCK: &str = "digital-clock";

/// Settings of a digital clock instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    #[serde(rename = "Use24Hour")]
    pub use_24_hour: bool,
    #[serde(rename = "ShowSeconds")]
    pub show_seconds: bool,
    #[serde(rename = "ShowDate")]
    pub show_date: bool,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            use_24_hour: true,
            show_seconds: false,
            show_date: false,
        }
    }
}

impl ClockSettings {
    /// `strftime` pattern for these settings.
    pub fn time_format(&self) -> String {
        let time = match (self.use_24_hour, self.show_seconds) {
            (true, true) => "%H:%M:%S",
            (true, false) => "%H:%M",
            (false, true) => "%I:%M:%S %p",
            (false, false) => "%I:%M %p",
        };
        if self.show_date {
            format!("%a %d %b {}", time)
        } else {
            time.to_string()
        }
    }

    fn from_dyn(settings: &dyn WidgetSettings) -> Self {
        if let Some(settings) = settings.downcast_ref::<ClockSettings>() {
            return settings.clone();
        }
        settings
            .to_json()
            .and_then(serde_json::from_value)
            .unwrap_or_default()
    }
}

/// Live clock of one widget instance.
#[derive(Debug)]
pub struct ClockFace {
    instance_id: String,
    settings: RwLock<ClockSettings>,
}

impl ClockFace {
    pub fn settings(&self) -> ClockSettings {
        self.settings.read().clone()
    }

    pub fn render_at<Tz>(&self, time: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        time.format(&self.settings.read().time_format()).to_string()
    }

    pub fn render(&self) -> String {
        self.render_at(&Local::now())
    }
}

impl WidgetContent for ClockFace {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Default)]
pub struct ClockWidgets {
    faces: Mutex<HashMap<String, Arc<ClockFace>>>,
    visible: Mutex<HashSet<String>>,
}

impl ClockWidgets {
    pub fn is_visible(&self, instance_id: &str) -> bool {
        self.visible.lock().contains(instance_id)
    }

    fn release(&self, instance_id: &str) {
        self.faces.lock().remove(instance_id);
        self.visible.lock().remove(instance_id);
    }
}

fn check_type(type_tag: &str) -> WidgetResult<()> {
    if type_tag == DIGITAL_CLOCK {
        Ok(())
    } else {
        Err(WidgetError(format!("unknown widget type '{}'", type_tag)))
    }
}

impl WidgetGroup for ClockWidgets {
    fn initialize(&self, context: WidgetContext) -> WidgetResult<()> {
        info!("Clock widgets ready as '{}'", context.plugin_id());
        Ok(())
    }

    fn create_content(
        &self,
        instance_id: &str,
        type_tag: &str,
        settings: &dyn WidgetSettings,
    ) -> WidgetResult<ContentHandle> {
        check_type(type_tag)?;
        let face = Arc::new(ClockFace {
            instance_id: instance_id.to_string(),
            settings: RwLock::new(ClockSettings::from_dyn(settings)),
        });
        self.faces.lock().insert(instance_id.to_string(), face.clone());
        Ok(face)
    }

    fn activate(&self, instance_id: &str) -> WidgetResult<()> {
        self.visible.lock().insert(instance_id.to_string());
        Ok(())
    }

    fn deactivate(&self, instance_id: &str) -> WidgetResult<()> {
        self.visible.lock().remove(instance_id);
        Ok(())
    }

    fn unpin(&self, instance_id: &str) -> WidgetResult<()> {
        self.release(instance_id);
        Ok(())
    }

    fn delete(&self, instance_id: &str) -> WidgetResult<()> {
        self.release(instance_id);
        Ok(())
    }

    fn default_settings(&self, type_tag: &str) -> WidgetResult<Box<dyn WidgetSettings>> {
        check_type(type_tag)?;
        Ok(Box::new(ClockSettings::default()))
    }

    fn parse_settings(&self, type_tag: &str, raw: &str) -> WidgetResult<Box<dyn WidgetSettings>> {
        check_type(type_tag)?;
        parse_settings_as::<ClockSettings>(raw)
    }

    fn on_settings_changed(&self, event: &SettingsChangedEvent<'_>) -> WidgetResult<()> {
        if let Some(face) = self.faces.lock().get(event.instance_id) {
            *face.settings.write() = ClockSettings::from_dyn(event.settings);
            debug!("Clock '{}' now formats as '{}'", event.instance_id, face.settings.read().time_format());
        }
        Ok(())
    }

    fn shutdown(&self) -> WidgetResult<()> {
        self.faces.lock().clear();
        self.visible.lock().clear();
        Ok(())
    }
}

/// Manifest used when the plugin is linked into the host.
pub fn manifest() -> Result<PluginManifest, VersionError> {
    let mut clock = WidgetTypeDescriptor::new(DIGITAL_CLOCK, WidgetSize::new(220, 90));
    clock.name = Some("Digital Clock".to_string());
    clock.min_size = Some(WidgetSize::new(120, 50));

    Ok(ManifestBuilder::new(PLUGIN_ID, "Clock Widgets", PluginVersion::parse(env!("CARGO_PKG_VERSION"))?)
        .description("Digital clock for the desktop.")
        .author("Perch Developers")
        .api_version(VersionRange::from_constraint("^1.0")?)
        .preinstalled(true)
        .widget(clock)
        .build())
}

pub extern "C-unwind" fn register(registrar: &mut ModuleRegistrar) {
    registrar.register_default::<ClockWidgets>();
}

#[cfg(feature = "dynamic")]
perch_core::declare_widget_group!(ClockWidgets);

#[cfg(test)]
mod tests;

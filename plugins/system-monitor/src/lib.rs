//! CPU and network widgets fed by the host's telemetry engine.
//!
//! A panel subscribes to its hardware domain while its window is visible
//! and drops the subscription when hidden, so the engine only samples what
//! is on screen.
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use perch_core::plugin_system::version::VersionError;
use perch_core::plugin_system::{
    ContentHandle, ManifestBuilder, ModuleRegistrar, PluginManifest, PluginVersion, SettingsChangedEvent,
    VersionRange, WidgetContent, WidgetContext, WidgetError, WidgetGroup, WidgetResult, WidgetSettings, WidgetSize,
    WidgetTypeDescriptor, parse_settings_as,
};
use perch_core::telemetry::{CpuStats, DomainSample, DomainStats, HardwareDomain, NetworkStats, Subscription};

pub const PLUGIN_ID: &str = "system-monitor";
pub const CPU_WIDGET: &str = "cpu";
pub const NETWORK_WIDGET: &str = "network";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuSettings {
    #[serde(rename = "ShowPerCore")]
    pub show_per_core: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Show bits per second instead of bytes per second.
    #[serde(rename = "UseBps")]
    pub use_bps: bool,
    /// Only count this interface; all interfaces when unset.
    #[serde(rename = "Interface", skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelSettings {
    Cpu(CpuSettings),
    Network(NetworkSettings),
}

impl PanelSettings {
    fn for_type(type_tag: &str, settings: &dyn WidgetSettings) -> WidgetResult<Self> {
        match type_tag {
            CPU_WIDGET => Ok(PanelSettings::Cpu(decode(settings))),
            NETWORK_WIDGET => Ok(PanelSettings::Network(decode(settings))),
            other => Err(unknown_type(other)),
        }
    }

    fn domain(&self) -> HardwareDomain {
        match self {
            PanelSettings::Cpu(_) => HardwareDomain::Cpu,
            PanelSettings::Network(_) => HardwareDomain::Network,
        }
    }
}

fn decode<T>(settings: &dyn WidgetSettings) -> T
where
    T: Clone + Default + for<'de> Deserialize<'de> + 'static,
{
    if let Some(typed) = settings.downcast_ref::<T>() {
        return typed.clone();
    }
    settings
        .to_json()
        .and_then(serde_json::from_value)
        .unwrap_or_default()
}

fn unknown_type(type_tag: &str) -> WidgetError {
    WidgetError(format!("unknown widget type '{}'", type_tag))
}

/// Formats a transfer rate. Bits use decimal prefixes, bytes binary ones.
pub fn format_rate(bytes_per_sec: f64, use_bps: bool) -> String {
    let (mut value, base, units) = if use_bps {
        (bytes_per_sec * 8.0, 1000.0, ["b/s", "Kb/s", "Mb/s", "Gb/s"])
    } else {
        (bytes_per_sec, 1024.0, ["B/s", "KB/s", "MB/s", "GB/s"])
    };
    let mut unit = 0;
    while value >= base && unit < units.len() - 1 {
        value /= base;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, units[unit])
    } else {
        format!("{:.1} {}", value, units[unit])
    }
}

pub fn format_cpu(stats: &CpuStats, settings: &CpuSettings) -> String {
    let mut text = format!("CPU {:.1}%", stats.usage_percent);
    if settings.show_per_core && !stats.per_core_percent.is_empty() {
        let cores: Vec<String> = stats
            .per_core_percent
            .iter()
            .map(|p| format!("{:.0}", p))
            .collect();
        text.push_str(&format!(" [{}]", cores.join(" ")));
    }
    text
}

pub fn format_network(stats: &NetworkStats, settings: &NetworkSettings) -> String {
    let (rx, tx) = stats
        .interfaces
        .iter()
        .filter(|i| settings.interface.as_deref().is_none_or(|name| name == i.name))
        .fold((0.0, 0.0), |(rx, tx), i| (rx + i.rx_bytes_per_sec, tx + i.tx_bytes_per_sec));
    format!(
        "down {} up {}",
        format_rate(rx, settings.use_bps),
        format_rate(tx, settings.use_bps)
    )
}

/// Live panel of one widget instance.
#[derive(Debug)]
pub struct MonitorPanel {
    instance_id: String,
    settings: RwLock<PanelSettings>,
    latest: RwLock<Option<DomainStats>>,
}

impl MonitorPanel {
    pub fn settings(&self) -> PanelSettings {
        self.settings.read().clone()
    }

    /// Text for the latest reading, or `None` before the first one.
    pub fn text(&self) -> Option<String> {
        let latest = self.latest.read();
        match (latest.as_ref()?, &*self.settings.read()) {
            (DomainStats::Cpu(stats), PanelSettings::Cpu(settings)) => Some(format_cpu(stats, settings)),
            (DomainStats::Network(stats), PanelSettings::Network(settings)) => {
                Some(format_network(stats, settings))
            }
            _ => None,
        }
    }

    fn apply(&self, sample: &DomainSample) {
        if sample.domain() == self.settings.read().domain() {
            *self.latest.write() = Some(sample.stats.clone());
        }
    }
}

impl WidgetContent for MonitorPanel {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Default)]
pub struct SystemMonitor {
    context: OnceLock<WidgetContext>,
    panels: Mutex<HashMap<String, Arc<MonitorPanel>>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl SystemMonitor {
    pub fn is_subscribed(&self, instance_id: &str) -> bool {
        self.subscriptions.lock().contains_key(instance_id)
    }

    fn panel(&self, instance_id: &str) -> WidgetResult<Arc<MonitorPanel>> {
        self.panels
            .lock()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| WidgetError(format!("no panel for widget '{}'", instance_id)))
    }

    fn release(&self, instance_id: &str) {
        self.subscriptions.lock().remove(instance_id);
        self.panels.lock().remove(instance_id);
    }
}

impl WidgetGroup for SystemMonitor {
    fn initialize(&self, context: WidgetContext) -> WidgetResult<()> {
        info!("System monitor ready as '{}'", context.plugin_id());
        self.context
            .set(context)
            .map_err(|_| WidgetError::from("initialized twice"))
    }

    fn create_content(
        &self,
        instance_id: &str,
        type_tag: &str,
        settings: &dyn WidgetSettings,
    ) -> WidgetResult<ContentHandle> {
        let panel = Arc::new(MonitorPanel {
            instance_id: instance_id.to_string(),
            settings: RwLock::new(PanelSettings::for_type(type_tag, settings)?),
            latest: RwLock::new(None),
        });
        self.panels.lock().insert(instance_id.to_string(), panel.clone());
        Ok(panel)
    }

    fn activate(&self, instance_id: &str) -> WidgetResult<()> {
        let panel = self.panel(instance_id)?;
        let telemetry = self
            .context
            .get()
            .map(|c| c.telemetry().clone())
            .ok_or_else(|| WidgetError::from("not initialized"))?;
        let domain = panel.settings.read().domain();

        if let Some(sample) = telemetry.snapshot(domain) {
            panel.apply(&sample);
        }
        let weak: Weak<MonitorPanel> = Arc::downgrade(&panel);
        let subscription = telemetry.subscribe(domain, move |sample| {
            if let Some(panel) = weak.upgrade() {
                panel.apply(sample);
            }
        });
        self.subscriptions.lock().insert(instance_id.to_string(), subscription);
        debug!("Widget '{}' subscribed to {}", instance_id, domain);
        Ok(())
    }

    fn deactivate(&self, instance_id: &str) -> WidgetResult<()> {
        self.subscriptions.lock().remove(instance_id);
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
        match type_tag {
            CPU_WIDGET => Ok(Box::new(CpuSettings::default())),
            NETWORK_WIDGET => Ok(Box::new(NetworkSettings::default())),
            other => Err(unknown_type(other)),
        }
    }

    fn parse_settings(&self, type_tag: &str, raw: &str) -> WidgetResult<Box<dyn WidgetSettings>> {
        match type_tag {
            CPU_WIDGET => parse_settings_as::<CpuSettings>(raw),
            NETWORK_WIDGET => parse_settings_as::<NetworkSettings>(raw),
            other => Err(unknown_type(other)),
        }
    }

    fn on_settings_changed(&self, event: &SettingsChangedEvent<'_>) -> WidgetResult<()> {
        let settings = PanelSettings::for_type(event.type_tag, event.settings)?;
        if let Some(panel) = self.panels.lock().get(event.instance_id) {
            *panel.settings.write() = settings;
        }
        Ok(())
    }

    fn shutdown(&self) -> WidgetResult<()> {
        self.subscriptions.lock().clear();
        self.panels.lock().clear();
        Ok(())
    }
}

/// Manifest used when the plugin is linked into the host.
pub fn manifest() -> Result<PluginManifest, VersionError> {
    let mut cpu = WidgetTypeDescriptor::new(CPU_WIDGET, WidgetSize::new(240, 120));
    cpu.name = Some("CPU Usage".to_string());
    let mut network = WidgetTypeDescriptor::new(NETWORK_WIDGET, WidgetSize::new(240, 120));
    network.name = Some("Network Throughput".to_string());

    Ok(ManifestBuilder::new(PLUGIN_ID, "System Monitor", PluginVersion::parse(env!("CARGO_PKG_VERSION"))?)
        .description("CPU and network usage at a glance.")
        .author("Perch Developers")
        .api_version(VersionRange::from_constraint("^1.0")?)
        .preinstalled(true)
        .widget(cpu)
        .widget(network)
        .build())
}

pub extern "C-unwind" fn register(registrar: &mut ModuleRegistrar) {
    registrar.register_default::<SystemMonitor>();
}

#[cfg(feature = "dynamic")]
perch_core::declare_widget_group!(SystemMonitor);

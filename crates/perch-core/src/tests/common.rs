#![cfg(test)]

//! Fixtures shared by the unit and integration tests: a widget group that
//! records every call, built-in registration functions with various
//! defects, a scripted hardware monitor and helpers for plugin directories.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::plugin_system::error::{WidgetError, WidgetResult};
use crate::plugin_system::manifest::{ManifestBuilder, PluginManifest, WidgetSize, WidgetTypeDescriptor};
use crate::plugin_system::traits::{
    ContentHandle, ModuleRegistrar, SettingsChangedEvent, WidgetContent, WidgetContext, WidgetGroup,
    WidgetSettings, parse_settings_as,
};
use crate::plugin_system::version::PluginVersion;
use crate::storage::error::{StorageResult, StorageSystemError};
use crate::storage::local::LocalStorageProvider;
use crate::storage::provider::StorageProvider;
use crate::telemetry::engine::{SamplingIntervals, TelemetryEngine};
use crate::telemetry::error::TelemetryError;
use crate::telemetry::monitor::HardwareMonitor;
use crate::telemetry::stats::{
    CpuStats, DomainStats, GpuAdapterStats, GpuStats, HardwareDomain, MemoryStats, NetworkInterfaceStats,
    NetworkStats,
};

// ===== RECORDING WIDGET GROUP =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "UseBps")]
    pub use_bps: bool,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            label: "default".to_string(),
            use_bps: false,
        }
    }
}

#[derive(Debug)]
pub struct TestContent {
    pub instance_id: String,
    pub type_tag: String,
    pub settings: Option<TestSettings>,
}

impl WidgetContent for TestContent {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

static CALL_LOGS: LazyLock<Mutex<HashMap<String, Arc<Mutex<Vec<String>>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Calls recorded by every [`RecordingGroup`] initialized for `plugin_id`,
/// formatted as `operation:instance_id`.
pub fn call_log(plugin_id: &str) -> Arc<Mutex<Vec<String>>> {
    CALL_LOGS
        .lock()
        .entry(plugin_id.to_string())
        .or_default()
        .clone()
}

pub fn calls(plugin_id: &str) -> Vec<String> {
    call_log(plugin_id).lock().clone()
}

/// Makes the named operation panic or fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    pub panic_on: Option<&'static str>,
    pub fail_on: Option<&'static str>,
}

#[derive(Debug, Default)]
pub struct RecordingGroup {
    plugin_id: OnceLock<String>,
    faults: Faults,
}

impl RecordingGroup {
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            plugin_id: OnceLock::new(),
            faults,
        }
    }

    fn record(&self, operation: &'static str, instance_id: &str) -> WidgetResult<()> {
        let plugin_id = self.plugin_id.get().map(String::as_str).unwrap_or("");
        call_log(plugin_id)
            .lock()
            .push(format!("{}:{}", operation, instance_id));
        if self.faults.panic_on == Some(operation) {
            panic!("{} exploded for {}", operation, instance_id);
        }
        if self.faults.fail_on == Some(operation) {
            return Err(WidgetError::from(format!("{} refused", operation)));
        }
        Ok(())
    }
}

impl WidgetGroup for RecordingGroup {
    fn initialize(&self, context: WidgetContext) -> WidgetResult<()> {
        let _ = self.plugin_id.set(context.plugin_id().to_string());
        self.record("initialize", "")
    }

    fn create_content(
        &self,
        instance_id: &str,
        type_tag: &str,
        settings: &dyn WidgetSettings,
    ) -> WidgetResult<ContentHandle> {
        self.record("create_content", instance_id)?;
        Ok(Arc::new(TestContent {
            instance_id: instance_id.to_string(),
            type_tag: type_tag.to_string(),
            settings: settings.downcast_ref::<TestSettings>().cloned(),
        }))
    }

    fn activate(&self, instance_id: &str) -> WidgetResult<()> {
        self.record("activate", instance_id)
    }

    fn deactivate(&self, instance_id: &str) -> WidgetResult<()> {
        self.record("deactivate", instance_id)
    }

    fn unpin(&self, instance_id: &str) -> WidgetResult<()> {
        self.record("unpin", instance_id)
    }

    fn delete(&self, instance_id: &str) -> WidgetResult<()> {
        self.record("delete", instance_id)
    }

    fn default_settings(&self, _type_tag: &str) -> WidgetResult<Box<dyn WidgetSettings>> {
        self.record("default_settings", "")?;
        Ok(Box::new(TestSettings::default()))
    }

    fn parse_settings(&self, _type_tag: &str, raw: &str) -> WidgetResult<Box<dyn WidgetSettings>> {
        self.record("parse_settings", "")?;
        parse_settings_as::<TestSettings>(raw)
    }

    fn on_settings_changed(&self, event: &SettingsChangedEvent<'_>) -> WidgetResult<()> {
        let label = event
            .settings
            .downcast_ref::<TestSettings>()
            .map(|s| s.label.clone())
            .unwrap_or_default();
        self.record("settings_changed", &format!("{}={}", event.instance_id, label))
    }

    fn shutdown(&self) -> WidgetResult<()> {
        self.record("shutdown", "")
    }
}

// ===== BUILT-IN REGISTRATION FUNCTIONS =====

pub extern "C-unwind" fn register_recording(registrar: &mut ModuleRegistrar) {
    registrar.register_default::<RecordingGroup>();
}

pub extern "C-unwind" fn register_nothing(_registrar: &mut ModuleRegistrar) {}

pub extern "C-unwind" fn register_two_groups(registrar: &mut ModuleRegistrar) {
    registrar.register_default::<RecordingGroup>();
    registrar.register("SecondGroup", || Ok(Box::new(RecordingGroup::default()) as Box<dyn WidgetGroup>));
}

pub extern "C-unwind" fn register_panicking(_registrar: &mut ModuleRegistrar) {
    panic!("registration exploded");
}

pub extern "C-unwind" fn register_failing_factory(registrar: &mut ModuleRegistrar) {
    registrar.register("BrokenGroup", || Err(WidgetError::from("no hardware found")));
}

pub extern "C-unwind" fn register_failing_init(registrar: &mut ModuleRegistrar) {
    registrar.register("FailingInit", || {
        Ok(Box::new(RecordingGroup::with_faults(Faults {
            fail_on: Some("initialize"),
            ..Faults::default()
        })) as Box<dyn WidgetGroup>)
    });
}

pub extern "C-unwind" fn register_panicky_activate(registrar: &mut ModuleRegistrar) {
    registrar.register("PanickyActivate", || {
        Ok(Box::new(RecordingGroup::with_faults(Faults {
            panic_on: Some("activate"),
            ..Faults::default()
        })) as Box<dyn WidgetGroup>)
    });
}

// ===== MANIFESTS AND PLUGIN DIRECTORIES =====

pub const DEFAULT_TEST_SIZE: WidgetSize = WidgetSize::new(200, 100);

pub fn test_manifest(id: &str, version: &str, type_tags: &[&str]) -> PluginManifest {
    let version = PluginVersion::parse(version).expect("test version");
    type_tags
        .iter()
        .fold(ManifestBuilder::new(id, id, version), |builder, tag| {
            builder.widget(WidgetTypeDescriptor::new(tag, DEFAULT_TEST_SIZE))
        })
        .build()
}

/// JSON body of a `manifest.json` for a plugin offering `type_tags`.
pub fn manifest_json(id: &str, version: &str, type_tags: &[&str]) -> String {
    let widgets: Vec<serde_json::Value> = type_tags
        .iter()
        .map(|tag| {
            serde_json::json!({
                "type_tag": tag,
                "default_size": { "width": 200, "height": 100 }
            })
        })
        .collect();
    serde_json::json!({
        "id": id,
        "name": id,
        "version": version,
        "entry_module": "entry.so",
        "widgets": widgets,
    })
    .to_string()
}

/// Creates `root/dir_name` with the given manifest and, optionally, a
/// placeholder entry module.
pub fn write_plugin_dir(root: &Path, dir_name: &str, manifest: &str, with_entry: bool) -> PathBuf {
    let dir = root.join(dir_name);
    fs::create_dir_all(&dir).expect("create plugin dir");
    fs::write(dir.join("manifest.json"), manifest).expect("write manifest");
    if with_entry {
        fs::write(dir.join("entry.so"), b"not a real library").expect("write entry");
    }
    dir
}

// ===== HARDWARE MONITOR =====

/// Hardware monitor returning scripted readings and recording every refresh.
#[derive(Debug, Default)]
pub struct ScriptedMonitor {
    readings: Mutex<HashMap<HardwareDomain, DomainStats>>,
    failing: Mutex<HashSet<HardwareDomain>>,
    panicking: Mutex<HashSet<HardwareDomain>>,
    refreshed: Mutex<Vec<HardwareDomain>>,
    delay: Option<Duration>,
}

impl ScriptedMonitor {
    pub fn new() -> Self {
        let monitor = Self::default();
        monitor.set(DomainStats::Cpu(cpu_stats(12.5)));
        monitor.set(DomainStats::Gpu(GpuStats {
            adapters: vec![GpuAdapterStats {
                name: "card0".to_string(),
                busy_percent: Some(40.0),
                vram_used_bytes: Some(512),
                vram_total_bytes: Some(1024),
            }],
        }));
        monitor.set(DomainStats::Memory(MemoryStats {
            total_bytes: 1000,
            available_bytes: 250,
            used_bytes: 750,
            usage_percent: 75.0,
        }));
        monitor.set(DomainStats::Network(NetworkStats {
            interfaces: vec![NetworkInterfaceStats {
                name: "eth0".to_string(),
                rx_bytes_per_sec: 1024.0,
                tx_bytes_per_sec: 512.0,
            }],
        }));
        monitor
    }

    /// Every refresh sleeps for `delay` first.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn set(&self, stats: DomainStats) {
        self.readings.lock().insert(stats.domain(), stats);
    }

    pub fn fail(&self, domain: HardwareDomain) {
        self.failing.lock().insert(domain);
    }

    pub fn recover(&self, domain: HardwareDomain) {
        self.failing.lock().remove(&domain);
        self.panicking.lock().remove(&domain);
    }

    pub fn panic_on(&self, domain: HardwareDomain) {
        self.panicking.lock().insert(domain);
    }

    pub fn refreshed(&self) -> Vec<HardwareDomain> {
        self.refreshed.lock().clone()
    }
}

impl HardwareMonitor for ScriptedMonitor {
    fn refresh(&self, domain: HardwareDomain) -> Result<DomainStats, TelemetryError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.refreshed.lock().push(domain);
        if self.panicking.lock().contains(&domain) {
            panic!("sensor driver crashed");
        }
        if self.failing.lock().contains(&domain) {
            return Err(TelemetryError::Unavailable(domain));
        }
        self.readings
            .lock()
            .get(&domain)
            .cloned()
            .ok_or(TelemetryError::Unavailable(domain))
    }
}

pub fn cpu_stats(usage: f32) -> CpuStats {
    CpuStats {
        usage_percent: usage,
        per_core_percent: vec![usage, usage],
    }
}

pub fn test_telemetry() -> Arc<TelemetryEngine> {
    Arc::new(TelemetryEngine::new(
        Arc::new(ScriptedMonitor::new()),
        SamplingIntervals::default(),
    ))
}

// ===== STORAGE =====

/// Local storage whose writes fail while `failing` is set.
#[derive(Debug)]
pub struct SwitchableStorage {
    inner: LocalStorageProvider,
    pub failing: AtomicBool,
}

impl SwitchableStorage {
    pub fn new(base: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalStorageProvider::new(base.to_path_buf()),
            failing: AtomicBool::new(false),
        })
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl StorageProvider for SwitchableStorage {
    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
        self.inner.create_dir_all(path)
    }

    fn read_to_string(&self, path: &Path) -> StorageResult<String> {
        self.inner.read_to_string(path)
    }

    fn write_bytes(&self, path: &Path, contents: &[u8]) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageSystemError::io(
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                "write_bytes",
                self.inner.resolve(path),
            ));
        }
        self.inner.write_bytes(path, contents)
    }

    fn copy(&self, from: &Path, to: &Path) -> StorageResult<()> {
        self.inner.copy(from, to)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.inner.resolve(path)
    }
}

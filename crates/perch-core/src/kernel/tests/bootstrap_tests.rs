#![cfg(test)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tempfile::tempdir;

use crate::kernel::bootstrap::Host;
use crate::kernel::error::{Error, KernelLifecyclePhase};
use crate::lifecycle::controller::LifecycleController;
use crate::lifecycle::state::WidgetState;
use crate::plugin_system::manager::WidgetPluginManager;
use crate::remote::error::{ProxyError, ProxyFault};
use crate::remote::proxy::ProxySource;
use crate::storage::config::HostConfig;
use crate::storage::settings::SettingsStore;
use crate::telemetry::engine::TelemetryEngine;
use crate::tests::common::{ScriptedMonitor, calls, manifest_json, register_recording, test_manifest, write_plugin_dir};

fn test_config(dir: &Path) -> HostConfig {
    let mut config = HostConfig::default().with_data_dir(dir);
    config.telemetry.interval_ms = 20;
    config.telemetry.low_power_interval_ms = 200;
    config
}

fn host_with(dir: &Path, plugin_id: &str) -> Host {
    Host::builder(test_config(dir))
        .builtin_plugin(test_manifest(plugin_id, "1.0", &["clock"]), register_recording)
        .monitor(Arc::new(ScriptedMonitor::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_build_does_not_touch_the_data_dir() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let host = host_with(&data_dir, "boot-lazy");
    assert!(!host.is_started());
    assert!(!data_dir.exists());
    assert!(!host.plugins().is_loaded("boot-lazy"));
    assert_eq!(host.config().settings_path(), data_dir.join("widgets.json"));
}

#[tokio::test]
async fn test_start_loads_plugins_and_restores_widgets() {
    let dir = tempdir().unwrap();
    let mut host = host_with(dir.path(), "boot-start");
    host.start().await.unwrap();

    assert!(host.is_started());
    assert!(host.plugins().is_loaded("boot-start"));
    assert!(host.telemetry().is_running());
    assert_eq!(calls("boot-start"), vec!["initialize:".to_string()]);

    let id = host
        .lifecycle()
        .add_widget("boot-start", "clock", None)
        .await
        .unwrap()
        .id;
    assert!(host.store().path().exists());
    host.shutdown().await.unwrap();
    assert!(!host.is_started());
    assert!(!host.telemetry().is_running());
    assert!(calls("boot-start").contains(&"shutdown:".to_string()));

    let mut restarted = host_with(dir.path(), "boot-start");
    restarted.start().await.unwrap();
    assert_eq!(restarted.lifecycle().state(&id), Some(WidgetState::Inactive));
    restarted.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_double_start_is_rejected() {
    let dir = tempdir().unwrap();
    let mut host = host_with(dir.path(), "boot-twice");
    host.start().await.unwrap();

    let err = host.start().await.unwrap_err();
    assert!(matches!(
        err,
        Error::KernelLifecycleError {
            phase: KernelLifecyclePhase::Bootstrap,
            ..
        }
    ));
    host.shutdown().await.unwrap();
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_components_are_reachable_by_type() {
    let dir = tempdir().unwrap();
    let host = host_with(dir.path(), "boot-components");

    let store = host.get_component::<SettingsStore>().await.unwrap();
    assert!(Arc::ptr_eq(&store, host.store()));
    let telemetry = host.get_component::<TelemetryEngine>().await.unwrap();
    assert!(Arc::ptr_eq(&telemetry, host.telemetry()));
    let plugins = host.get_component::<WidgetPluginManager>().await.unwrap();
    assert!(Arc::ptr_eq(&plugins, host.plugins()));
    let lifecycle = host.get_component::<LifecycleController>().await.unwrap();
    assert!(Arc::ptr_eq(&lifecycle, host.lifecycle()));
}

#[tokio::test]
async fn test_low_power_config_and_toggle() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.low_power = true;
    let host = Host::builder(config)
        .monitor(Arc::new(ScriptedMonitor::new()))
        .build()
        .unwrap();
    assert!(host.telemetry().is_low_power());
    assert_eq!(host.telemetry().current_interval().as_millis(), 200);

    let mut power_mode = host.telemetry().power_mode();
    host.set_power_mode(false);
    power_mode.changed().await.unwrap();
    assert!(!*power_mode.borrow());
    assert_eq!(host.telemetry().current_interval().as_millis(), 20);
}

#[tokio::test]
async fn test_broken_plugin_does_not_stop_startup() {
    let dir = tempdir().unwrap();
    write_plugin_dir(
        &dir.path().join("plugins"),
        "broken",
        &manifest_json("boot-broken", "1.0", &["clock"]),
        false,
    );
    let mut host = host_with(dir.path(), "boot-healthy");
    host.start().await.unwrap();

    assert!(host.plugins().is_loaded("boot-healthy"));
    assert!(!host.plugins().is_loaded("boot-broken"));
    assert!(!host.plugins().last_report().is_clean());
    host.shutdown().await.unwrap();
}

struct CountingSource {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl ProxySource for CountingSource {
    type Handle = ();

    async fn acquire(&self) -> Result<(), ProxyFault> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ProxyFault::Transient("not running".to_string()))
    }
}

#[tokio::test]
async fn test_proxy_uses_configured_attempts() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.proxy.max_attempts = 5;
    let host = Host::builder(config)
        .monitor(Arc::new(ScriptedMonitor::new()))
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let proxy = host.proxy(CountingSource {
        attempts: attempts.clone(),
    });
    let err = proxy.invoke(|_| async { Ok::<_, ProxyFault>(()) }).await.unwrap_err();
    assert!(matches!(err, ProxyError::Exhausted { attempts: 5, .. }));
    assert_eq!(attempts.load(Ordering::SeqCst), 5);
}

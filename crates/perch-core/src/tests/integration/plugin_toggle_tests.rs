#![cfg(test)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use crate::kernel::bootstrap::Host;
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::state::WidgetState;
use crate::storage::config::HostConfig;
use crate::tests::common::{ScriptedMonitor, TestContent, TestSettings, calls, register_recording, test_manifest};

fn build_host(dir: &Path, plugin_id: &str) -> Host {
    Host::builder(HostConfig::default().with_data_dir(dir))
        .builtin_plugin(test_manifest(plugin_id, "1.0", &["network"]), register_recording)
        .monitor(Arc::new(ScriptedMonitor::new()))
        .build()
        .unwrap()
}

fn settings_line(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .find(|l| l.trim_start().starts_with("\"settings\""))
        .map(str::to_string)
        .unwrap()
}

#[tokio::test]
async fn test_toggling_a_plugin_keeps_settings_intact() {
    let dir = tempdir().unwrap();
    let mut host = build_host(dir.path(), "toggle-net");
    host.start().await.unwrap();
    let lifecycle = host.lifecycle().clone();

    let id = lifecycle.add_widget("toggle-net", "network", None).await.unwrap().id;
    let settings = TestSettings {
        label: "attic".to_string(),
        use_bps: true,
    };
    lifecycle.update_settings(&id, Box::new(settings.clone())).await.unwrap();
    lifecycle.window_shown(&id).await.unwrap();
    let before = settings_line(&host.store().path());

    assert_eq!(lifecycle.disable_plugin("toggle-net").await.unwrap(), vec![id.clone()]);
    assert!(calls("toggle-net").contains(&"shutdown:".to_string()));
    assert!(lifecycle.available_widget_types().is_empty());

    // A write while the plugin is away carries the block through untouched.
    lifecycle.disable(&id).await.unwrap();
    assert_eq!(settings_line(&host.store().path()), before);
    assert!(host.store().get(&id).unwrap().settings.is_preserved());

    lifecycle.enable_plugin("toggle-net").await.unwrap();
    lifecycle.enable(&id).await.unwrap();
    let content = lifecycle.window_shown(&id).await.unwrap().unwrap();
    let content = content.as_any().downcast_ref::<TestContent>().unwrap();
    assert_eq!(content.settings, Some(settings));
    assert_eq!(lifecycle.state(&id), Some(WidgetState::Active));
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_settings_of_a_disabled_plugin_survive_restart() {
    let dir = tempdir().unwrap();
    let id = {
        let mut host = build_host(dir.path(), "toggle-restart");
        host.start().await.unwrap();
        let lifecycle = host.lifecycle();
        let id = lifecycle.add_widget("toggle-restart", "network", None).await.unwrap().id;
        lifecycle
            .update_settings_json(&id, r#"{"Label": "hall"}"#)
            .await
            .unwrap();
        lifecycle.disable_plugin("toggle-restart").await.unwrap();
        host.shutdown().await.unwrap();
        id
    };

    let mut host = build_host(dir.path(), "toggle-restart");
    host.start().await.unwrap();
    let restored = host.store().get(&id).unwrap();
    assert_eq!(
        restored.settings.downcast_ref::<TestSettings>().map(|s| s.label.as_str()),
        Some("hall")
    );
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabling_an_unknown_plugin_fails() {
    let dir = tempdir().unwrap();
    let mut host = build_host(dir.path(), "toggle-known");
    host.start().await.unwrap();

    let err = host.lifecycle().disable_plugin("toggle-unknown").await.unwrap_err();
    assert!(matches!(err, LifecycleError::PluginNotLoaded(_)));
    assert!(host.lifecycle().enable_plugin("toggle-unknown").await.is_err());
    host.shutdown().await.unwrap();
}

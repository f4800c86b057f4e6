#![cfg(test)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;

use crate::kernel::bootstrap::Host;
use crate::lifecycle::state::WidgetState;
use crate::storage::config::HostConfig;
use crate::tests::common::{ScriptedMonitor, TestContent, TestSettings, register_recording, test_manifest};

const RAW_SETTINGS: &str = r#"{"UseBps": true,   "Future": [1,  2]}"#;

fn seed(dir: &Path) {
    let document = format!(
        r#"{{
  "format_version": 1,
  "widgets": [
    {{
      "id": "abc123",
      "plugin_id": "flow-sysmon",
      "type_tag": "network",
      "pinned": true,
      "settings": {}
    }}
  ]
}}"#,
        RAW_SETTINGS
    );
    fs::write(dir.join("widgets.json"), document).unwrap();
}

fn build_host(dir: &Path, with_plugin: bool) -> Host {
    let mut builder = Host::builder(HostConfig::default().with_data_dir(dir))
        .monitor(Arc::new(ScriptedMonitor::new()));
    if with_plugin {
        builder = builder.builtin_plugin(test_manifest("flow-sysmon", "1.0", &["network"]), register_recording);
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn test_settings_round_trip_through_missing_plugin() {
    let dir = tempdir().unwrap();
    seed(dir.path());

    // Without its plugin the widget is restored and its block written back verbatim.
    {
        let mut host = build_host(dir.path(), false);
        host.start().await.unwrap();
        let lifecycle = host.lifecycle();
        assert_eq!(lifecycle.state("abc123"), Some(WidgetState::Inactive));
        assert!(lifecycle.window_shown("abc123").await.unwrap().is_none());
        lifecycle.disable("abc123").await.unwrap();
        lifecycle.enable("abc123").await.unwrap();
        host.shutdown().await.unwrap();

        let written = fs::read_to_string(host.store().path()).unwrap();
        assert!(written.contains(RAW_SETTINGS), "{}", written);
    }

    // With the plugin back the same block decodes into its settings type.
    let mut host = build_host(dir.path(), true);
    host.start().await.unwrap();
    let lifecycle = host.lifecycle();
    let content = lifecycle.window_shown("abc123").await.unwrap().unwrap();
    let content = content.as_any().downcast_ref::<TestContent>().unwrap();
    let settings = content.settings.clone().unwrap();
    assert!(settings.use_bps);
    assert_eq!(settings.label, "default");

    lifecycle
        .update_settings_json("abc123", r#"{"UseBps": false, "Label": "lan"}"#)
        .await
        .unwrap();
    host.shutdown().await.unwrap();

    let written = fs::read_to_string(host.store().path()).unwrap();
    assert!(!written.contains(RAW_SETTINGS));
    let mut host = build_host(dir.path(), true);
    host.start().await.unwrap();
    let restored = host.store().get("abc123").unwrap();
    assert_eq!(
        restored.settings.downcast_ref::<TestSettings>(),
        Some(&TestSettings {
            label: "lan".to_string(),
            use_bps: false,
        })
    );
    host.shutdown().await.unwrap();
}

#![cfg(test)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::tempdir;

use crate::kernel::bootstrap::Host;
use crate::lifecycle::controller::DeleteOutcome;
use crate::lifecycle::state::WidgetState;
use crate::storage::config::HostConfig;
use crate::storage::settings::Placement;
use crate::telemetry::stats::{DomainStats, HardwareDomain};
use crate::tests::common::{ScriptedMonitor, TestContent, calls, register_recording, test_manifest};

fn build_host(dir: &Path, plugin_id: &str, monitor: Arc<ScriptedMonitor>) -> Host {
    let mut config = HostConfig::default().with_data_dir(dir);
    config.telemetry.interval_ms = 20;
    Host::builder(config)
        .builtin_plugin(test_manifest(plugin_id, "1.0", &["clock", "network"]), register_recording)
        .monitor(monitor)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_widget_survives_restart() {
    let dir = tempdir().unwrap();
    let placement = Placement {
        x: 40,
        y: 80,
        width: 300,
        height: 150,
    };

    let (shown, hidden) = {
        let mut host = build_host(dir.path(), "e2e-restart", Arc::new(ScriptedMonitor::new()));
        host.start().await.unwrap();
        let lifecycle = host.lifecycle();
        let shown = lifecycle
            .add_widget("e2e-restart", "clock", Some(placement))
            .await
            .unwrap()
            .id;
        let hidden = lifecycle
            .add_widget("e2e-restart", "network", None)
            .await
            .unwrap()
            .id;
        lifecycle.window_shown(&shown).await.unwrap();
        lifecycle.disable(&hidden).await.unwrap();
        host.shutdown().await.unwrap();
        (shown, hidden)
    };

    let mut host = build_host(dir.path(), "e2e-restart", Arc::new(ScriptedMonitor::new()));
    host.start().await.unwrap();
    let lifecycle = host.lifecycle();
    assert_eq!(lifecycle.state(&shown), Some(WidgetState::Inactive));
    assert_eq!(lifecycle.state(&hidden), Some(WidgetState::Disabled));
    assert_eq!(host.store().get(&shown).and_then(|i| i.placement), Some(placement));

    let content = lifecycle.window_shown(&shown).await.unwrap().unwrap();
    let content = content.as_any().downcast_ref::<TestContent>().unwrap();
    assert_eq!(content.type_tag, "clock");
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_hides_widgets_before_plugins_stop() {
    let dir = tempdir().unwrap();
    let mut host = build_host(dir.path(), "e2e-order", Arc::new(ScriptedMonitor::new()));
    host.start().await.unwrap();
    let id = host
        .lifecycle()
        .add_widget("e2e-order", "clock", None)
        .await
        .unwrap()
        .id;
    host.lifecycle().window_shown(&id).await.unwrap();
    host.shutdown().await.unwrap();

    let log = calls("e2e-order");
    let deactivated = log.iter().position(|c| *c == format!("deactivate:{}", id)).unwrap();
    let shut_down = log.iter().position(|c| c == "shutdown:").unwrap();
    assert!(deactivated < shut_down, "{:?}", log);
}

#[tokio::test]
async fn test_widget_telemetry_flows_while_running() {
    let dir = tempdir().unwrap();
    let monitor = Arc::new(ScriptedMonitor::new());
    let mut host = build_host(dir.path(), "e2e-telemetry", monitor.clone());
    host.start().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = host.telemetry().subscribe(HardwareDomain::Memory, move |sample| {
        if let DomainStats::Memory(stats) = &sample.stats {
            sink.lock().push(stats.usage_percent);
        }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(seen.lock()[0], 75.0);
    assert!(!monitor.refreshed().contains(&HardwareDomain::Disk));

    host.telemetry().unsubscribe(subscription);
    assert_eq!(host.telemetry().subscriber_count(HardwareDomain::Memory), 0);
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_delete_through_host_removes_record_from_disk() {
    let dir = tempdir().unwrap();
    let mut host = build_host(dir.path(), "e2e-delete", Arc::new(ScriptedMonitor::new()));
    host.start().await.unwrap();
    let id = host
        .lifecycle()
        .add_widget("e2e-delete", "clock", None)
        .await
        .unwrap()
        .id;
    let on_disk = std::fs::read_to_string(host.store().path()).unwrap();
    assert!(on_disk.contains(&id));

    assert_eq!(host.lifecycle().delete(&id).await.unwrap(), DeleteOutcome::Deleted);
    let on_disk = std::fs::read_to_string(host.store().path()).unwrap();
    assert!(!on_disk.contains(&id));
    host.shutdown().await.unwrap();
}

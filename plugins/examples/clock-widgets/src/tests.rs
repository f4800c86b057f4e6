use chrono::{FixedOffset, TimeZone};
use perch_core::plugin_system::{WidgetGroup, WidgetSettings};

use super::*;

fn afternoon() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .and_then(|tz| tz.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).single())
        .unwrap()
}

fn face_of(group: &ClockWidgets, instance_id: &str, settings: ClockSettings) -> Arc<ClockFace> {
    group.create_content(instance_id, DIGITAL_CLOCK, &settings).unwrap();
    group.faces.lock().get(instance_id).cloned().unwrap()
}

#[test]
fn test_formats_follow_settings() {
    let group = ClockWidgets::default();
    let face = face_of(&group, "c1", ClockSettings::default());
    assert_eq!(face.render_at(&afternoon()), "14:05");

    let face = face_of(
        &group,
        "c2",
        ClockSettings {
            use_24_hour: false,
            show_seconds: true,
            show_date: true,
        },
    );
    assert_eq!(face.render_at(&afternoon()), "Sat 09 Mar 02:05:07 PM");
}

#[test]
fn test_settings_use_pascal_case_keys() {
    let parsed = ClockWidgets::default()
        .parse_settings(DIGITAL_CLOCK, r#"{"ShowSeconds": true, "Theme": "dark"}"#)
        .unwrap();
    let parsed = parsed.downcast_ref::<ClockSettings>().unwrap();
    assert!(parsed.show_seconds);
    assert!(parsed.use_24_hour);

    let json = ClockSettings::default().to_json().unwrap();
    assert_eq!(json["Use24Hour"], serde_json::Value::Bool(true));
}

#[test]
fn test_settings_change_reaches_live_face() {
    let group = ClockWidgets::default();
    let face = face_of(&group, "c1", ClockSettings::default());
    let updated = ClockSettings {
        show_seconds: true,
        ..ClockSettings::default()
    };
    group
        .on_settings_changed(&SettingsChangedEvent {
            instance_id: "c1",
            type_tag: DIGITAL_CLOCK,
            settings: &updated,
        })
        .unwrap();
    assert_eq!(face.settings(), updated);
    assert_eq!(face.render_at(&afternoon()), "14:05:07");
}

#[test]
fn test_visibility_and_release() {
    let group = ClockWidgets::default();
    face_of(&group, "c1", ClockSettings::default());
    group.activate("c1").unwrap();
    assert!(group.is_visible("c1"));
    group.deactivate("c1").unwrap();
    assert!(!group.is_visible("c1"));

    group.activate("c1").unwrap();
    group.unpin("c1").unwrap();
    assert!(!group.is_visible("c1"));
    assert!(group.faces.lock().is_empty());
}

#[test]
fn test_unknown_type_is_refused() {
    let group = ClockWidgets::default();
    assert!(group.default_settings("analog-clock").is_err());
    assert!(
        group
            .create_content("c1", "analog-clock", &ClockSettings::default())
            .is_err()
    );
}

#[test]
fn test_manifest_describes_the_clock() {
    let manifest = manifest().unwrap();
    assert_eq!(manifest.id, PLUGIN_ID);
    assert_eq!(manifest.version.as_str(), env!("CARGO_PKG_VERSION"));
    let clock = manifest.widget_type(DIGITAL_CLOCK).unwrap();
    assert_eq!(clock.display_name(), "Digital Clock");
    assert!(manifest.preinstalled);
}

//! Loading tests: the shipped `world/` directory and hand-written worlds in
//! temporary directories.

use signal_control::PolicyKind;
use signal_core::test_fixtures::{four_arm_layout, two_stage_plans};
use signal_core::{ControllerOptions, JunctionId, Mode};
use signal_world::{build_controllers, load_world};
use std::collections::BTreeMap;
use std::path::Path;

/// The world directory at the workspace root.
fn world_dir() -> String {
    let manifest = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    format!("{manifest}/../../world")
}

fn write_json(dir: &Path, name: &str, value: &impl serde::Serialize) {
    std::fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Fixture layout with `J1` demoted to a plain node, so only `J0` needs plans.
fn write_fixture_world(dir: &Path) {
    let mut layout = four_arm_layout();
    layout.junctions[1].signalised = false;
    write_json(dir, "layout.json", &layout);
    let plans = BTreeMap::from([(JunctionId::from("J0"), two_stage_plans())]);
    write_json(dir, "plans.json", &serde_json::json!({ "junctions": plans }));
}

#[test]
fn shipped_world_loads() {
    let world = load_world(&world_dir()).unwrap();
    assert_eq!(world.layout.signalised_junctions().count(), 2);
    assert!(world.options.pedestrian_stage_enabled);
    for plans in world.plans.values() {
        for mode in Mode::ALL {
            assert!(!plans[&mode].is_empty());
        }
    }
}

#[test]
fn shipped_world_builds_controllers() {
    let world = load_world(&world_dir()).unwrap();
    for kind in PolicyKind::ALL {
        let controllers = build_controllers(&world, &world.options, kind, 1).unwrap();
        assert_eq!(controllers.len(), 2);
    }
}

#[test]
fn options_file_is_optional() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_world(dir.path());
    let world = load_world(dir.path().to_str().unwrap()).unwrap();
    assert_eq!(world.options, ControllerOptions::default());
}

#[test]
fn partial_options_keep_defaults() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_world(dir.path());
    std::fs::write(dir.path().join("options.json"), r#"{ "packet_error_rate": 0.25 }"#).unwrap();
    let world = load_world(dir.path().to_str().unwrap()).unwrap();
    assert!((world.options.packet_error_rate - 0.25).abs() < 1e-12);
    assert!((world.options.scan_range_meters - 100.0).abs() < 1e-12);
}

#[test]
fn unknown_option_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_world(dir.path());
    std::fs::write(dir.path().join("options.json"), r#"{ "scan_rnage_meters": 50 }"#).unwrap();
    let err = load_world(dir.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("parsing options.json"), "{err:#}");
}

#[test]
fn missing_layout_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_world(dir.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("reading layout.json"), "{err:#}");
}

#[test]
fn invalid_option_value_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture_world(dir.path());
    std::fs::write(dir.path().join("options.json"), r#"{ "packet_error_rate": 2.0 }"#).unwrap();
    let err = load_world(dir.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{err:#}").contains("packet_error_rate"), "{err:#}");
}

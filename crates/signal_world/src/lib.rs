//! World loading shared by the CLI and tests: static layout, per-junction
//! plans and controller options from a directory of JSON files, validated
//! and turned into one controller per signalised junction.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use signal_control::PolicyKind;
use signal_core::{
    AdaptiveController, ConfigError, ControllerOptions, JunctionGeometry, JunctionId,
    NetworkLayout, PlanSet,
};

/// Everything a run needs besides the observation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub layout: NetworkLayout,
    pub plans: BTreeMap<JunctionId, PlanSet>,
    pub options: ControllerOptions,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PlansFile {
    junctions: BTreeMap<JunctionId, PlanSet>,
}

fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {name}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {name}"))
}

/// Loads `layout.json`, `plans.json` and, if present, `options.json`.
pub fn load_world(world_dir: &str) -> Result<World> {
    let dir = Path::new(world_dir);
    let layout: NetworkLayout = read_json(dir, "layout.json")?;
    let plans: PlansFile = read_json(dir, "plans.json")?;
    let options: ControllerOptions = if dir.join("options.json").exists() {
        read_json(dir, "options.json")?
    } else {
        ControllerOptions::default()
    };
    let world = World {
        layout,
        plans: plans.junctions,
        options,
    };
    validate_world(&world).with_context(|| format!("validating world in {world_dir}"))?;
    tracing::info!(
        junctions = world.layout.junctions.len(),
        signalised = world.layout.signalised_junctions().count(),
        lanes = world.layout.lanes.len(),
        loops = world.layout.loops.len(),
        "world loaded"
    );
    Ok(world)
}

/// Checks cross-references between layout, plans and options.
///
/// Catches mistakes like a lane on an unknown edge, a loop on an unknown lane,
/// a route through a missing edge, or a signalised junction without plans.
pub fn validate_world(world: &World) -> Result<()> {
    let layout = &world.layout;
    signal_core::validate_options(&world.options)?;

    let mut junction_ids = HashSet::new();
    for junction in &layout.junctions {
        ensure!(
            junction_ids.insert(&junction.id),
            "duplicate junction id '{}'",
            junction.id
        );
    }

    let mut edge_ids = HashSet::new();
    for edge in &layout.edges {
        ensure!(edge_ids.insert(&edge.id), "duplicate edge id '{}'", edge.id);
        for end in [&edge.from_junction, &edge.to_junction] {
            if !junction_ids.contains(end) {
                return Err(ConfigError::UnknownJunction(end.clone()))
                    .with_context(|| format!("edge '{}'", edge.id));
            }
        }
    }

    let mut lane_ids = HashSet::new();
    for lane in &layout.lanes {
        ensure!(lane_ids.insert(&lane.id), "duplicate lane id '{}'", lane.id);
        if !edge_ids.contains(&lane.edge) {
            bail!(ConfigError::UnknownEdge {
                edge: lane.edge.clone(),
                context: format!("lane '{}'", lane.id),
            });
        }
        ensure!(
            lane.speed_limit > 0.0 && lane.width > 0.0,
            "lane '{}' needs a positive speed limit and width",
            lane.id
        );
    }

    let mut loop_ids = HashSet::new();
    for detector in &layout.loops {
        if !loop_ids.insert(&detector.id) {
            bail!(ConfigError::DuplicateLoop(detector.id.clone()));
        }
        if !lane_ids.contains(&detector.lane) {
            bail!(ConfigError::UnknownLane {
                lane: detector.lane.clone(),
                context: format!("loop '{}'", detector.id),
            });
        }
    }

    for route in &layout.routes {
        for edge in &route.edges {
            if !edge_ids.contains(edge) {
                bail!(ConfigError::UnknownEdge {
                    edge: edge.clone(),
                    context: format!("route '{}'", route.id),
                });
            }
        }
    }

    for junction in layout.signalised_junctions() {
        for lane in &junction.controlled_links {
            if !lane_ids.contains(lane) {
                bail!(ConfigError::UnknownLane {
                    lane: lane.clone(),
                    context: format!("junction '{}' controlled links", junction.id),
                });
            }
        }
        ensure!(
            world.plans.contains_key(&junction.id),
            "signalised junction '{}' has no plans",
            junction.id
        );
    }

    for junction in world.plans.keys() {
        let signalised = layout.junction(junction).is_some_and(|j| j.signalised);
        ensure!(
            signalised,
            "plans given for '{junction}', which is not a signalised junction"
        );
    }
    Ok(())
}

/// Writes `run_info.json` describing a run into `dir`.
pub fn write_run_info(
    dir: &Path,
    run_id: &str,
    seed: u64,
    world_dir: &str,
    args: serde_json::Value,
) -> Result<()> {
    let info = serde_json::json!({
        "run_id": run_id,
        "seed": seed,
        "start_time": chrono::Utc::now().to_rfc3339(),
        "world_dir": world_dir,
        "crate_version": env!("CARGO_PKG_VERSION"),
        "args": args,
    });
    let path = dir.join("run_info.json");
    let file =
        std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, &info)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Seed for the `index`-th controller of a run seeded with `base`.
pub fn junction_seed(base: u64, index: usize) -> u64 {
    // SplitMix64 finaliser over the combined value.
    let mut z = base.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One controller per signalised junction, in layout order.
pub fn build_controllers(
    world: &World,
    options: &ControllerOptions,
    policy: PolicyKind,
    seed: u64,
) -> Result<Vec<AdaptiveController>> {
    world
        .layout
        .signalised_junctions()
        .enumerate()
        .map(|(index, junction)| {
            let plans = world
                .plans
                .get(&junction.id)
                .with_context(|| format!("no plans for junction '{}'", junction.id))?;
            let geometry = JunctionGeometry::build(&world.layout, &junction.id, options)
                .with_context(|| format!("building geometry for junction '{}'", junction.id))?;
            AdaptiveController::new(
                geometry,
                plans,
                options.clone(),
                policy.build(),
                junction_seed(seed, index),
            )
            .with_context(|| format!("building controller for junction '{}'", junction.id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::test_fixtures::{four_arm_layout, junction_id, two_stage_plans};
    use signal_core::{EdgeId, LaneId, LoopDef, LoopId, Mode, Point};

    fn fixture_world() -> World {
        let mut plans = BTreeMap::new();
        plans.insert(junction_id(), two_stage_plans());
        let mut j1_plans = PlanSet::new();
        for mode in Mode::ALL {
            j1_plans.insert(
                mode,
                vec![signal_core::Stage {
                    id: signal_core::StageId::from("only"),
                    control_string: "G".to_string(),
                    period: 20.0,
                }],
            );
        }
        plans.insert(JunctionId::from("J1"), j1_plans);
        World {
            layout: four_arm_layout(),
            plans,
            options: ControllerOptions::default(),
        }
    }

    #[test]
    fn test_fixture_world_is_valid() {
        validate_world(&fixture_world()).unwrap();
    }

    #[test]
    fn test_loop_on_unknown_lane_is_rejected() {
        let mut world = fixture_world();
        world.layout.loops.push(LoopDef {
            id: LoopId::from("ghost_loop"),
            lane: LaneId::from("ghost_0"),
            position: Point::new(0.0, 0.0),
        });
        let err = validate_world(&world).unwrap_err();
        assert!(err.to_string().contains("ghost_0"), "{err}");
    }

    #[test]
    fn test_duplicate_loop_is_rejected() {
        let mut world = fixture_world();
        let first = world.layout.loops[0].clone();
        world.layout.loops.push(first);
        let err = validate_world(&world).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::DuplicateLoop(_))
        ));
    }

    #[test]
    fn test_route_through_missing_edge_is_rejected() {
        let mut world = fixture_world();
        world.layout.routes[0].edges.push(EdgeId::from("nowhere"));
        assert!(validate_world(&world).is_err());
    }

    #[test]
    fn test_signalised_junction_without_plans_is_rejected() {
        let mut world = fixture_world();
        world.plans.remove(&JunctionId::from("J1"));
        let err = validate_world(&world).unwrap_err();
        assert!(err.to_string().contains("J1"), "{err}");
    }

    #[test]
    fn test_plans_for_plain_node_are_rejected() {
        let mut world = fixture_world();
        world.plans.insert(JunctionId::from("N"), two_stage_plans());
        assert!(validate_world(&world).is_err());
    }

    #[test]
    fn test_junction_seeds_differ_and_repeat() {
        assert_ne!(junction_seed(42, 0), junction_seed(42, 1));
        assert_ne!(junction_seed(42, 0), junction_seed(43, 0));
        assert_eq!(junction_seed(42, 3), junction_seed(42, 3));
    }

    #[test]
    fn test_run_info_is_written() {
        let dir = tempfile::tempdir().unwrap();
        write_run_info(dir.path(), "run_a", 9, "world", serde_json::json!({ "policy": "round_robin" }))
            .unwrap();
        let text = std::fs::read_to_string(dir.path().join("run_info.json")).unwrap();
        let info: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(info["run_id"], "run_a");
        assert_eq!(info["seed"], 9);
        assert_eq!(info["args"]["policy"], "round_robin");
    }

    #[test]
    fn test_builds_one_controller_per_signalised_junction() {
        let world = fixture_world();
        let controllers =
            build_controllers(&world, &world.options, PolicyKind::DemandWeighted, 7).unwrap();
        let ids: Vec<&str> = controllers.iter().map(|c| c.junction().0.as_str()).collect();
        assert_eq!(ids, vec!["J0", "J1"]);
        assert!(controllers
            .iter()
            .all(|c| c.policy_name() == "demand_weighted"));
    }
}

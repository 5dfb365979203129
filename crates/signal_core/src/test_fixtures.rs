//! Shared test fixtures for signal_core and downstream crates.
//!
//! `four_arm_layout()` is a single signalised crossroads `J0` at the origin
//! with one incoming lane per arm, a signalised neighbour `J1` 150 m to the
//! east, and loops placed to exercise the upstream-edge walk:
//!
//! - north: `n_far → n_in`, straight, both loops count
//! - east: `e_link → e_in`, `e_link` ends at `J1` so only `e_loop` counts
//! - south: `s_side → s_in`, `s_side` runs east-west so it is ignored

use crate::channel::T_GEN_CAM_MAX_S;
use crate::controller::AdaptiveController;
use crate::geometry::JunctionGeometry;
use crate::policy::RoundRobin;
use crate::sequencer::LightActuator;
use crate::{
    ControllerOptions, EdgeDef, EdgeId, JunctionDef, JunctionId, LaneDef, LaneId, LoopDef, LoopId,
    Mode, NetworkLayout, PlanSet, Point, RouteDef, Stage, StageId, VehicleCategory, VehicleId,
    VehicleObservation, VehicleReport,
};

pub const SPEED_LIMIT: f64 = 13.9;

pub fn junction_id() -> JunctionId {
    JunctionId::from("J0")
}

fn square(centre: Point, half: f64) -> Vec<Point> {
    vec![
        Point::new(centre.x - half, centre.y - half),
        Point::new(centre.x + half, centre.y - half),
        Point::new(centre.x + half, centre.y + half),
        Point::new(centre.x - half, centre.y + half),
    ]
}

fn node(id: &str, x: f64, y: f64) -> JunctionDef {
    JunctionDef {
        id: JunctionId::from(id),
        position: Point::new(x, y),
        shape: vec![],
        signalised: false,
        controlled_links: vec![],
        pedestrian_crossing: false,
    }
}

fn edge(id: &str, from: &str, to: &str) -> EdgeDef {
    EdgeDef {
        id: EdgeId::from(id),
        from_junction: JunctionId::from(from),
        to_junction: JunctionId::from(to),
    }
}

fn lane(edge: &str, shape: &[(f64, f64)]) -> LaneDef {
    LaneDef {
        id: LaneId(format!("{edge}_0")),
        edge: EdgeId::from(edge),
        shape: shape.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        width: 3.2,
        speed_limit: SPEED_LIMIT,
    }
}

fn induction_loop(id: &str, lane: &str, x: f64, y: f64) -> LoopDef {
    LoopDef {
        id: LoopId::from(id),
        lane: LaneId::from(lane),
        position: Point::new(x, y),
    }
}

fn route(id: &str, edges: &[&str]) -> RouteDef {
    RouteDef {
        id: id.to_string(),
        edges: edges.iter().map(|&e| EdgeId::from(e)).collect(),
    }
}

pub fn four_arm_layout() -> NetworkLayout {
    let j0 = JunctionDef {
        id: junction_id(),
        position: Point::new(0.0, 0.0),
        shape: square(Point::new(0.0, 0.0), 5.0),
        signalised: true,
        controlled_links: ["n_in_0", "s_in_0", "e_in_0", "w_in_0"]
            .into_iter()
            .map(LaneId::from)
            .collect(),
        pedestrian_crossing: true,
    };
    let j1 = JunctionDef {
        id: JunctionId::from("J1"),
        position: Point::new(150.0, 0.0),
        shape: square(Point::new(150.0, 0.0), 5.0),
        signalised: true,
        controlled_links: vec![LaneId::from("e_link_0")],
        pedestrian_crossing: false,
    };

    NetworkLayout {
        junctions: vec![
            j0,
            j1,
            node("N", 0.0, 150.0),
            node("NN", 0.0, 400.0),
            node("S", 0.0, -150.0),
            node("SW", -300.0, -150.0),
            node("W", -150.0, 0.0),
            node("J2", 400.0, 0.0),
        ],
        edges: vec![
            edge("n_far", "NN", "N"),
            edge("n_in", "N", "J0"),
            edge("s_side", "SW", "S"),
            edge("s_in", "S", "J0"),
            edge("e_link", "J2", "J1"),
            edge("e_in", "J1", "J0"),
            edge("w_in", "W", "J0"),
            edge("n_out", "J0", "N"),
            edge("s_out", "J0", "S"),
            edge("e_out", "J0", "J1"),
            edge("w_out", "J0", "W"),
        ],
        lanes: vec![
            lane("n_far", &[(-1.6, 400.0), (-1.6, 150.0)]),
            lane("n_in", &[(-1.6, 150.0), (-1.6, 5.0)]),
            lane("s_side", &[(-300.0, -151.6), (-1.6, -151.6)]),
            lane("s_in", &[(1.6, -150.0), (1.6, -5.0)]),
            lane("e_link", &[(400.0, 1.6), (155.0, 1.6)]),
            lane("e_in", &[(145.0, 1.6), (5.0, 1.6)]),
            lane("w_in", &[(-150.0, -1.6), (-5.0, -1.6)]),
            lane("n_out", &[(1.6, 5.0), (1.6, 150.0)]),
            lane("s_out", &[(-1.6, -5.0), (-1.6, -150.0)]),
            lane("e_out", &[(5.0, -1.6), (145.0, -1.6)]),
            lane("w_out", &[(-5.0, 1.6), (-150.0, 1.6)]),
        ],
        loops: vec![
            induction_loop("n_loop", "n_in_0", -1.6, 40.0),
            induction_loop("n_far_loop", "n_far_0", -1.6, 180.0),
            induction_loop("e_loop", "e_in_0", 40.0, 1.6),
            induction_loop("e_link_loop", "e_link_0", 170.0, 1.6),
            induction_loop("s_side_loop", "s_side_0", -60.0, -151.6),
        ],
        routes: vec![
            route("north_south", &["n_far", "n_in", "s_out"]),
            route("south_north", &["s_side", "s_in", "n_out"]),
            route("east_west", &["e_link", "e_in", "w_out"]),
            route("west_east", &["w_in", "e_out"]),
        ],
    }
}

/// Geometry of `J0` under default options (intergreen 6 s).
pub fn four_arm_geometry() -> JunctionGeometry {
    JunctionGeometry::build(&four_arm_layout(), &junction_id(), &ControllerOptions::default())
        .expect("fixture layout is valid")
}

/// North-south then east-west, 30 s each, in every mode.
pub fn two_stage_plans() -> PlanSet {
    let stages = vec![
        Stage {
            id: StageId::from("ns"),
            control_string: "GGrr".to_string(),
            period: 30.0,
        },
        Stage {
            id: StageId::from("ew"),
            control_string: "rrGG".to_string(),
            period: 30.0,
        },
    ];
    Mode::ALL.into_iter().map(|m| (m, stages.clone())).collect()
}

/// Round-robin controller for `J0`.
pub fn make_controller(options: ControllerOptions, seed: u64) -> AdaptiveController {
    let geometry = JunctionGeometry::build(&four_arm_layout(), &junction_id(), &options)
        .expect("fixture layout is valid");
    AdaptiveController::new(geometry, &two_stage_plans(), options, Box::new(RoundRobin), seed)
        .expect("fixture plans are valid")
}

pub fn car(x: f64, y: f64, heading: f64, speed: f64) -> VehicleObservation {
    VehicleObservation {
        position: Point::new(x, y),
        heading,
        speed,
        category: VehicleCategory::Passenger,
        lane: None,
        turn_signals: 0,
    }
}

pub fn report(id: &str, position: Point, heading: f64, speed: f64, generation_time: f64) -> VehicleReport {
    VehicleReport {
        id: VehicleId::from(id),
        position,
        heading,
        speed,
        generation_time,
        lane: None,
        turn_signals: 0,
        ngc: 0,
        gen_interval: T_GEN_CAM_MAX_S,
    }
}

/// Actuator that keeps every command it receives.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    pub commands: Vec<(JunctionId, String)>,
}

impl RecordingActuator {
    pub fn states(&self) -> Vec<&str> {
        self.commands.iter().map(|(_, s)| s.as_str()).collect()
    }
}

impl LightActuator for RecordingActuator {
    fn set_light_state(&mut self, junction: &JunctionId, state: &str) {
        self.commands.push((junction.clone(), state.to_string()));
    }
}

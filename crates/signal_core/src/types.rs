//! Type definitions for `signal_core`.
//!
//! Ids, observations, broadcast reports, stages, static layout and the
//! controller options structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(VehicleId);
string_id!(JunctionId);
string_id!(LaneId);
string_id!(EdgeId);
string_id!(LoopId);
string_id!(StageId);

// ---------------------------------------------------------------------------
// Geometry primitives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Compass heading in degrees (0 = +y, 90 = +x) of the vector `from → to`.
pub fn heading_between(from: Point, to: Point) -> f64 {
    (to.x - from.x).atan2(to.y - from.y).to_degrees().rem_euclid(360.0)
}

/// Smallest absolute difference between two headings, in `[0, 180]`.
pub fn heading_delta(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

// ---------------------------------------------------------------------------
// Observations (what the environment reports each step)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleCategory {
    #[default]
    Passenger,
    Bus,
    Truck,
    Motorcycle,
    Bicycle,
    Pedestrian,
    Emergency,
}

/// One raw vehicle sample from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleObservation {
    pub position: Point,
    /// Compass degrees.
    pub heading: f64,
    /// Metres per second.
    pub speed: f64,
    #[serde(default)]
    pub category: VehicleCategory,
    #[serde(default)]
    pub lane: Option<LaneId>,
    #[serde(default)]
    pub turn_signals: u32,
}

impl VehicleObservation {
    pub fn is_well_formed(&self) -> bool {
        self.position.is_finite()
            && self.heading.is_finite()
            && self.speed.is_finite()
            && self.speed >= 0.0
    }
}

/// Everything the environment hands a junction controller for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observations {
    #[serde(default)]
    pub vehicles: BTreeMap<VehicleId, VehicleObservation>,
    /// Seconds since each induction loop last detected a vehicle.
    #[serde(default)]
    pub loop_dark_times: BTreeMap<LoopId, f64>,
}

impl Observations {
    /// Dark time for a loop, or `None` when the reading is absent or unusable.
    pub fn loop_dark_time(&self, loop_id: &LoopId) -> Option<f64> {
        self.loop_dark_times
            .get(loop_id)
            .copied()
            .filter(|dark| dark.is_finite() && *dark >= 0.0)
    }
}

// ---------------------------------------------------------------------------
// Broadcast channel types
// ---------------------------------------------------------------------------

/// A cooperative awareness report as seen on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleReport {
    pub id: VehicleId,
    pub position: Point,
    pub heading: f64,
    pub speed: f64,
    /// Simulation seconds at which the report was sampled.
    pub generation_time: f64,
    pub lane: Option<LaneId>,
    pub turn_signals: u32,
    /// Consecutive keep-alive generations since the last content trigger.
    pub ngc: u32,
    /// Seconds between this report's generation and the one before it.
    pub gen_interval: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CongestionState {
    Relaxed,
    Active,
    Restrictive,
}

impl CongestionState {
    /// Minimum inter-generation interval (seconds) imposed in this state.
    pub fn min_interval(self) -> f64 {
        match self {
            CongestionState::Relaxed => 0.1,
            CongestionState::Active => 0.2,
            CongestionState::Restrictive => 0.25,
        }
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Off,
    Peak,
    Inter,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Off, Mode::Peak, Mode::Inter];

    pub fn index(self) -> usize {
        match self {
            Mode::Off => 0,
            Mode::Peak => 1,
            Mode::Inter => 2,
        }
    }
}

/// A fixed combination of light indications, one character per controlled link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub control_string: String,
    /// Fixed-time duration in seconds, used when no evidence is available.
    pub period: f64,
}

/// Ordered stage lists per time-of-day mode.
pub type PlanSet = BTreeMap<Mode, Vec<Stage>>;

// ---------------------------------------------------------------------------
// Static layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneDef {
    pub id: LaneId,
    pub edge: EdgeId,
    /// Polyline in driving direction; the last point is the stop line.
    pub shape: Vec<Point>,
    #[serde(default = "default_lane_width")]
    pub width: f64,
    /// Metres per second.
    pub speed_limit: f64,
}

fn default_lane_width() -> f64 {
    3.2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub id: EdgeId,
    pub from_junction: JunctionId,
    pub to_junction: JunctionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDef {
    pub id: LoopId,
    pub lane: LaneId,
    pub position: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionDef {
    pub id: JunctionId,
    pub position: Point,
    #[serde(default)]
    pub shape: Vec<Point>,
    #[serde(default)]
    pub signalised: bool,
    /// Incoming lane of every controlled link, in control-string order.
    #[serde(default)]
    pub controlled_links: Vec<LaneId>,
    #[serde(default)]
    pub pedestrian_crossing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDef {
    pub id: String,
    pub edges: Vec<EdgeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkLayout {
    pub junctions: Vec<JunctionDef>,
    pub edges: Vec<EdgeDef>,
    pub lanes: Vec<LaneDef>,
    #[serde(default)]
    pub loops: Vec<LoopDef>,
    #[serde(default)]
    pub routes: Vec<RouteDef>,
}

impl NetworkLayout {
    pub fn junction(&self, id: &JunctionId) -> Option<&JunctionDef> {
        self.junctions.iter().find(|j| &j.id == id)
    }

    pub fn signalised_junctions(&self) -> impl Iterator<Item = &JunctionDef> {
        self.junctions.iter().filter(|j| j.signalised)
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-controller configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerOptions {
    pub scan_range_meters: f64,
    pub packet_error_rate: f64,
    pub positional_noise_enabled: bool,
    pub heading_noise_enabled: bool,
    pub min_green_multiplier: f64,
    pub max_green_multiplier: f64,
    pub pedestrian_stage_enabled: bool,
    pub tracked_category: VehicleCategory,
    /// Replaces the congestion-adaptive generation interval when set.
    pub fixed_dcc_interval: Option<f64>,
    pub amber_seconds: f64,
    pub red_amber_seconds: f64,
    pub min_all_red_seconds: f64,
    /// Remaining-green window in which extensions are evaluated; also the
    /// adaptive threshold for rejecting implausible GPS extensions.
    pub extension_window_seconds: f64,
    pub extend_time_seconds: f64,
    pub loop_dark_threshold_seconds: f64,
    pub seconds_per_meter_queue: f64,
    pub stall_check_interval_seconds: f64,
    pub pedestrian_walk_seconds: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            scan_range_meters: 100.0,
            packet_error_rate: 0.0,
            positional_noise_enabled: false,
            heading_noise_enabled: false,
            min_green_multiplier: 2.0,
            max_green_multiplier: 12.0,
            pedestrian_stage_enabled: false,
            tracked_category: VehicleCategory::Passenger,
            fixed_dcc_interval: None,
            amber_seconds: 3.0,
            red_amber_seconds: 2.0,
            min_all_red_seconds: 1.0,
            extension_window_seconds: 5.0,
            extend_time_seconds: 1.0,
            loop_dark_threshold_seconds: 1.5,
            seconds_per_meter_queue: 0.45,
            stall_check_interval_seconds: 2.7,
            pedestrian_walk_seconds: 10.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Step output
// ---------------------------------------------------------------------------

/// Observable controller state after one decision step.
///
/// Exposes what an external driver needs to detect gridlock or stalled runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub time_ms: u64,
    pub junction: JunctionId,
    pub mode: Mode,
    pub stage_index: usize,
    pub pedestrian_stage_active: bool,
    pub tracked_vehicles: usize,
    pub congestion: CongestionState,
    pub seconds_since_stage_change: f64,
    pub stage_time: f64,
    pub transition_active: bool,
    pub light_command_issued: bool,
}

//! Green-extension evidence from induction loops and broadcast reports.
//!
//! Every lookup here is total: missing loops, absent readings and vehicles
//! that match no lane all come back as "no evidence", never as errors.

use crate::channel::Snapshot;
use crate::geometry::JunctionGeometry;
use crate::{Observations, VehicleReport};

/// Below this speed (m/s) a vehicle counts as halted.
pub const HALT_SPEED_MPS: f64 = 0.01;

/// Outcome of the GPS-based extension check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpsEvidence {
    /// No tracked vehicle within catch distance on a green approach.
    NoVehicle,
    /// Seconds until the nearest approaching vehicle reaches the stop line.
    Extend(f64),
    /// Implausibly long extension, discarded.
    Rejected(f64),
    /// The nearest approaching vehicle is halted: the queue is not moving.
    Stalled,
}

impl GpsEvidence {
    /// Extension seconds this evidence contributes, if any.
    pub fn extension(self) -> Option<f64> {
        match self {
            GpsEvidence::Extend(seconds) => Some(seconds),
            GpsEvidence::NoVehicle | GpsEvidence::Rejected(_) => Some(0.0),
            GpsEvidence::Stalled => None,
        }
    }
}

/// Rounds up to 0.1 resolution.
pub fn ceil_tenth(value: f64) -> f64 {
    (value * 10.0).ceil() / 10.0
}

/// Extension for a vehicle `distance` metres from the stop line at the time
/// of a report `report_age_s` seconds old.
///
/// Extensions above twice `threshold` are rejected.
pub fn gps_extension_from(distance: f64, speed: f64, report_age_s: f64, threshold: f64) -> GpsEvidence {
    if speed <= HALT_SPEED_MPS {
        return GpsEvidence::Stalled;
    }
    let remaining = ceil_tenth((distance - speed * report_age_s.max(0.0)).abs());
    let extension = ceil_tenth(remaining / speed);
    if extension > 2.0 * threshold {
        GpsEvidence::Rejected(extension)
    } else {
        GpsEvidence::Extend(extension)
    }
}

/// Nearest report on a green approach lane within that lane's catch distance,
/// with its distance to the stop line.
pub fn nearest_approaching<'a>(
    geometry: &JunctionGeometry,
    active_lanes: &[usize],
    receive: &'a Snapshot,
) -> Option<(&'a VehicleReport, f64)> {
    let mut nearest: Option<(&VehicleReport, f64)> = None;
    for report in receive.values() {
        let Some(lane_idx) = geometry.match_lane(report) else {
            continue;
        };
        if !active_lanes.contains(&lane_idx) {
            continue;
        }
        let lane = geometry.lane(lane_idx);
        let distance = report.position.distance(lane.stop_line);
        if distance > lane.catch_distance {
            continue;
        }
        if nearest.is_none_or(|(_, best)| distance < best) {
            nearest = Some((report, distance));
        }
    }
    nearest
}

pub fn gps_extension(
    geometry: &JunctionGeometry,
    active_lanes: &[usize],
    receive: &Snapshot,
    now_s: f64,
    threshold: f64,
) -> GpsEvidence {
    match nearest_approaching(geometry, active_lanes, receive) {
        Some((report, distance)) => gps_extension_from(
            distance,
            report.speed,
            now_s - report.generation_time,
            threshold,
        ),
        None => GpsEvidence::NoVehicle,
    }
}

/// `Some(extend_time)` when any green lane's loops saw a vehicle within
/// `dark_threshold` seconds, `Some(0.0)` when readings exist but none are
/// recent, `None` when no green lane has any loop reading at all.
pub fn loop_extension(
    geometry: &JunctionGeometry,
    active_lanes: &[usize],
    observations: &Observations,
    extend_time: f64,
    dark_threshold: f64,
) -> Option<f64> {
    let mut any_reading = false;
    for &lane_idx in active_lanes {
        let darkest = geometry
            .lane(lane_idx)
            .loops
            .iter()
            .filter_map(|id| observations.loop_dark_time(id))
            .reduce(f64::min);
        if let Some(dark) = darkest {
            any_reading = true;
            if dark <= dark_threshold {
                return Some(extend_time);
            }
        }
    }
    any_reading.then_some(0.0)
}

/// Distance to the stop line of the furthest halted vehicle on a green approach.
pub fn queue_length(geometry: &JunctionGeometry, active_lanes: &[usize], receive: &Snapshot) -> Option<f64> {
    receive
        .values()
        .filter(|report| report.speed < HALT_SPEED_MPS)
        .filter_map(|report| {
            let lane_idx = geometry.match_lane(report)?;
            active_lanes
                .contains(&lane_idx)
                .then(|| report.position.distance(geometry.lane(lane_idx).stop_line))
        })
        .reduce(f64::max)
}

/// Green seconds needed to discharge a queue, whole seconds rounded up.
pub fn queue_discharge_seconds(queue_m: f64, seconds_per_meter: f64) -> f64 {
    (queue_m * seconds_per_meter).ceil()
}

/// Tracked reports on each lane, used for per-stage demand.
pub fn lane_counts(geometry: &JunctionGeometry, receive: &Snapshot) -> Vec<usize> {
    let mut counts = vec![0; geometry.lanes().len()];
    for report in receive.values() {
        if let Some(idx) = geometry.match_lane(report) {
            counts[idx] += 1;
        }
    }
    counts
}

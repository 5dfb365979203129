use super::*;
use crate::test_fixtures::{car, make_controller, RecordingActuator};

mod construction;

// --- Shared test helpers ------------------------------------------------

const STEP_MS: u64 = 100;

/// Steps the controller every 100 ms over `[from_ms, to_ms)`, feeding the
/// same observations each step.
fn run(
    controller: &mut AdaptiveController,
    actuator: &mut RecordingActuator,
    observations: &Observations,
    from_ms: u64,
    to_ms: u64,
) -> Vec<StepReport> {
    (from_ms..to_ms)
        .step_by(STEP_MS as usize)
        .map(|now| controller.decide(now, observations, actuator).unwrap())
        .collect()
}

/// Times at which the served stage changed.
fn switch_times(reports: &[StepReport]) -> Vec<u64> {
    reports
        .windows(2)
        .filter(|w| {
            w[0].stage_index != w[1].stage_index
                || w[0].pedestrian_stage_active != w[1].pedestrian_stage_active
        })
        .map(|w| w[1].time_ms)
        .collect()
}

fn observations(vehicles: &[(&str, VehicleObservation)]) -> Observations {
    Observations {
        vehicles: vehicles
            .iter()
            .map(|(id, obs)| (VehicleId::from(*id), obs.clone()))
            .collect(),
        loop_dark_times: std::collections::BTreeMap::new(),
    }
}

/// Halted car on the east approach, `distance` metres before the stop line.
fn queued_east(distance: f64) -> VehicleObservation {
    car(5.0 + distance, 1.6, 270.0, 0.0)
}

fn default_controller() -> AdaptiveController {
    make_controller(ControllerOptions::default(), 42)
}

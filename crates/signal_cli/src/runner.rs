use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use signal_control::PolicyKind;
use signal_core::{AdaptiveController, ControllerOptions, JunctionId, LightActuator, StepReport};
use signal_world::World;
use uuid::Uuid;

use crate::trace::TraceStep;

/// Counts the light commands each junction receives.
#[derive(Debug, Default)]
pub struct CountingActuator {
    pub counts: BTreeMap<JunctionId, u64>,
}

impl CountingActuator {
    pub fn count(&self, junction: &JunctionId) -> u64 {
        self.counts.get(junction).copied().unwrap_or(0)
    }
}

impl LightActuator for CountingActuator {
    fn set_light_state(&mut self, junction: &JunctionId, _state: &str) {
        *self.counts.entry(junction.clone()).or_insert(0) += 1;
    }
}

/// One row of `summary.csv`: a junction's totals over a replayed trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JunctionSummary {
    pub junction: JunctionId,
    pub policy: PolicyKind,
    pub seed: u64,
    pub packet_error_rate: f64,
    pub steps: u64,
    pub stage_switches: u64,
    pub pedestrian_stages: u64,
    pub light_commands: u64,
    pub commands_elided: u64,
    pub gps_extensions: u64,
    pub gps_rejections: u64,
    pub stall_truncations: u64,
    pub queue_seeds: u64,
    pub mean_tracked: f64,
    pub reports_lost: u64,
}

impl JunctionSummary {
    fn from_controller(
        controller: &AdaptiveController,
        actuator: &CountingActuator,
        policy: PolicyKind,
        seed: u64,
    ) -> Self {
        let metrics = controller.metrics();
        let mean_tracked = if metrics.steps == 0 {
            0.0
        } else {
            metrics.tracked_vehicle_steps as f64 / metrics.steps as f64
        };
        Self {
            junction: controller.junction().clone(),
            policy,
            seed,
            packet_error_rate: controller.options().packet_error_rate,
            steps: metrics.steps,
            stage_switches: metrics.stage_switches,
            pedestrian_stages: metrics.pedestrian_stages,
            light_commands: actuator.count(controller.junction()),
            commands_elided: controller.sequencer().commands_elided(),
            gps_extensions: metrics.gps_extensions,
            gps_rejections: metrics.gps_rejections,
            stall_truncations: metrics.stall_truncations,
            queue_seeds: metrics.queue_seeds,
            mean_tracked,
            reports_lost: controller.channel().stats().lost,
        }
    }
}

pub struct RunOutcome {
    pub run_id: String,
    pub summaries: Vec<JunctionSummary>,
    /// Every step report, in trace order then layout order. Empty unless
    /// steps were recorded.
    pub steps: Vec<StepReport>,
    pub wall_time_ms: u64,
}

/// Replays `trace` through one controller per signalised junction.
pub fn run_trace(
    world: &World,
    options: &ControllerOptions,
    policy: PolicyKind,
    seed: u64,
    trace: &[TraceStep],
    record_steps: bool,
) -> Result<RunOutcome> {
    let run_id = Uuid::new_v4().to_string();
    let start = Instant::now();

    let mut controllers = signal_world::build_controllers(world, options, policy, seed)?;
    let mut actuator = CountingActuator::default();
    let mut steps = Vec::new();

    for step in trace {
        let observations = step.observations();
        for controller in &mut controllers {
            let report = controller
                .decide(step.time_ms, &observations, &mut actuator)
                .with_context(|| {
                    format!(
                        "junction '{}' at {} ms",
                        controller.junction(),
                        step.time_ms
                    )
                })?;
            if record_steps {
                steps.push(report);
            }
        }
    }

    let summaries = controllers
        .iter()
        .map(|c| JunctionSummary::from_controller(c, &actuator, policy, seed))
        .collect();

    #[allow(clippy::cast_possible_truncation)]
    let wall_time_ms = start.elapsed().as_millis() as u64;
    tracing::debug!(%run_id, seed, wall_time_ms, "trace replayed");

    Ok(RunOutcome {
        run_id,
        summaries,
        steps,
        wall_time_ms,
    })
}

/// Writes `rows` to a CSV file with a header taken from the row type.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// Writes `summary.csv` and, when steps were recorded, `steps.csv` into `dir`.
pub fn write_outcome(dir: &Path, outcome: &RunOutcome) -> Result<()> {
    write_csv(&dir.join("summary.csv"), &outcome.summaries)?;
    if !outcome.steps.is_empty() {
        write_csv(&dir.join("steps.csv"), &outcome.steps)?;
    }
    Ok(())
}

//! Recorded observation traces: one JSON object per line.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use signal_core::{LoopId, Observations, VehicleId, VehicleObservation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceStep {
    pub time_ms: u64,
    #[serde(default)]
    pub vehicles: BTreeMap<VehicleId, VehicleObservation>,
    /// Seconds since each loop last detected a vehicle.
    #[serde(default)]
    pub loops: BTreeMap<LoopId, f64>,
}

/// A trace line as read, before per-vehicle validation.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTraceStep {
    time_ms: u64,
    #[serde(default)]
    vehicles: BTreeMap<VehicleId, serde_json::Value>,
    #[serde(default)]
    loops: BTreeMap<LoopId, serde_json::Value>,
}

impl RawTraceStep {
    /// Keeps every well-formed vehicle and loop reading; a bad entry only
    /// drops itself, for this step.
    fn into_step(self) -> TraceStep {
        let time_ms = self.time_ms;
        let vehicles = self
            .vehicles
            .into_iter()
            .filter_map(|(id, value)| {
                match serde_json::from_value::<VehicleObservation>(value) {
                    Ok(obs) if obs.is_well_formed() => Some((id, obs)),
                    Ok(_) => {
                        tracing::debug!(time_ms, vehicle = %id, "skipping non-finite observation");
                        None
                    }
                    Err(err) => {
                        tracing::debug!(time_ms, vehicle = %id, %err, "skipping malformed observation");
                        None
                    }
                }
            })
            .collect();
        let loops = self
            .loops
            .into_iter()
            .filter_map(|(id, value)| match value.as_f64() {
                Some(dark) if dark.is_finite() => Some((id, dark)),
                _ => {
                    tracing::debug!(time_ms, detector = %id, "skipping malformed loop reading");
                    None
                }
            })
            .collect();
        TraceStep {
            time_ms,
            vehicles,
            loops,
        }
    }
}

impl TraceStep {
    pub fn observations(&self) -> Observations {
        Observations {
            vehicles: self.vehicles.clone(),
            loop_dark_times: self.loops.clone(),
        }
    }
}

/// Reads a JSON-lines trace. Blank lines are skipped; times must increase.
/// Malformed vehicles and loop readings are dropped from their step only.
pub fn load_trace(path: &Path) -> Result<Vec<TraceStep>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("opening trace {}", path.display()))?;
    let mut steps: Vec<TraceStep> = Vec::new();
    for (idx, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("reading trace line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let step = serde_json::from_str::<RawTraceStep>(&line)
            .with_context(|| format!("parsing trace line {line_no}"))?
            .into_step();
        if let Some(prev) = steps.last() {
            ensure!(
                step.time_ms > prev.time_ms,
                "trace line {line_no}: time {} ms does not advance past {} ms",
                step.time_ms,
                prev.time_ms
            );
        }
        steps.push(step);
    }
    ensure!(!steps.is_empty(), "trace {} has no steps", path.display());
    Ok(steps)
}

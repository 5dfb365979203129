//! Per-junction adaptive stage controller.
//!
//! Order of operations per step:
//! 1. Clamp the committed stage time to the green bounds and refresh the
//!    time-of-day mode.
//! 2. Advance the broadcast channel.
//! 3. Unless a pedestrian stage runs, adjust the stage time from loop and
//!    broadcast evidence.
//! 4. Switch stage when the committed time has elapsed and no transition is
//!    in flight.
//! 5. Advance the transition sequencer, which issues any light command.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::channel::{BroadcastChannel, ChannelConfig};
use crate::evidence::{self, GpsEvidence};
use crate::geometry::JunctionGeometry;
use crate::policy::{StageContext, StagePolicy};
use crate::sequencer::{LightActuator, StageSequencer, TransitionPlan, TransitionTimings};
use crate::{
    mode_at, ConfigError, ControllerOptions, JunctionId, Mode, Observations, PlanSet, Stage,
    StepReport,
};

/// A stage younger than this has only just been switched to.
pub const JUST_SWITCHED_S: f64 = 0.11;
const TIME_EPSILON_S: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub mode: Mode,
    pub current_stage_index: usize,
    /// Committed duration of the current stage, seconds from its start.
    pub stage_time: f64,
    pub last_stage_change_ms: u64,
    pub pedestrian_stage_active: bool,
    pub stages_since_last_call: Vec<u32>,
    pub min_green_time: f64,
    pub max_green_time: f64,
    /// Control string of the stage being served (the transition target while
    /// a transition runs).
    pub current_control: String,
    pub next_stall_check_ms: Option<u64>,
    pub stages_since_pedestrian: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerMetrics {
    pub steps: u64,
    pub stage_switches: u64,
    pub pedestrian_stages: u64,
    pub queue_seeds: u64,
    pub gps_extensions: u64,
    pub gps_rejections: u64,
    pub stall_truncations: u64,
    /// Sum over steps of the receive-set size.
    pub tracked_vehicle_steps: u64,
}

/// Stages of one mode plus the green lanes of each, indexed by stage.
#[derive(Debug, Clone)]
struct ModePlan {
    stages: Vec<Stage>,
    active_lanes: Vec<Vec<usize>>,
}

pub fn validate_options(options: &ControllerOptions) -> Result<(), ConfigError> {
    fn require(ok: bool, name: &'static str, reason: &str) -> Result<(), ConfigError> {
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidOption {
                name,
                reason: reason.to_string(),
            })
        }
    }
    let o = options;
    require(
        (0.0..=1.0).contains(&o.packet_error_rate),
        "packet_error_rate",
        "must be within [0, 1]",
    )?;
    require(o.scan_range_meters > 0.0, "scan_range_meters", "must be positive")?;
    require(o.min_green_multiplier > 0.0, "min_green_multiplier", "must be positive")?;
    require(
        o.max_green_multiplier >= o.min_green_multiplier,
        "max_green_multiplier",
        "must not be below min_green_multiplier",
    )?;
    require(
        o.fixed_dcc_interval.is_none_or(|i| i > 0.0),
        "fixed_dcc_interval",
        "must be positive",
    )?;
    require(
        o.amber_seconds >= 0.0 && o.red_amber_seconds >= 0.0 && o.min_all_red_seconds >= 0.0,
        "amber_seconds",
        "phase durations must not be negative",
    )?;
    require(o.extension_window_seconds > 0.0, "extension_window_seconds", "must be positive")?;
    require(
        o.stall_check_interval_seconds > 0.0,
        "stall_check_interval_seconds",
        "must be positive",
    )?;
    require(o.seconds_per_meter_queue >= 0.0, "seconds_per_meter_queue", "must not be negative")?;
    require(o.pedestrian_walk_seconds >= 0.0, "pedestrian_walk_seconds", "must not be negative")?;
    Ok(())
}

/// Dry-runs every ordered pair of control strings through the transition table.
pub fn validate_transitions<'a>(
    strings: impl IntoIterator<Item = &'a str> + Clone,
) -> Result<(), ConfigError> {
    for from in strings.clone() {
        for to in strings.clone() {
            TransitionPlan::build(from, to)?;
        }
    }
    Ok(())
}

pub struct AdaptiveController {
    geometry: JunctionGeometry,
    options: ControllerOptions,
    plans: Vec<ModePlan>,
    pedestrian_control: Option<String>,
    channel: BroadcastChannel,
    sequencer: StageSequencer,
    policy: Box<dyn StagePolicy>,
    state: ControllerState,
    metrics: ControllerMetrics,
    current_active_lanes: Vec<usize>,
    current_period: f64,
    started: bool,
}

impl AdaptiveController {
    pub fn new(
        geometry: JunctionGeometry,
        plan_set: &PlanSet,
        options: ControllerOptions,
        policy: Box<dyn StagePolicy>,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        validate_options(&options)?;
        let junction = geometry.junction.clone();

        let mut plans = Vec::with_capacity(Mode::ALL.len());
        for mode in Mode::ALL {
            let stages = plan_set.get(&mode).ok_or_else(|| ConfigError::MissingPlan {
                junction: junction.clone(),
                mode,
            })?;
            if stages.is_empty() {
                return Err(ConfigError::EmptyPlan {
                    junction: junction.clone(),
                    mode,
                });
            }
            for stage in stages {
                let actual = stage.control_string.chars().count();
                if actual != geometry.link_count() {
                    return Err(ConfigError::StageLinkCount {
                        junction: junction.clone(),
                        stage: stage.id.clone(),
                        expected: geometry.link_count(),
                        actual,
                    });
                }
            }
            plans.push(ModePlan {
                active_lanes: stages
                    .iter()
                    .map(|s| geometry.active_lanes(&s.control_string))
                    .collect(),
                stages: stages.clone(),
            });
        }

        let pedestrian_control = (options.pedestrian_stage_enabled
            && geometry.has_pedestrian_crossing)
            .then(|| "r".repeat(geometry.link_count()));

        let mut reachable: Vec<&str> = plans
            .iter()
            .flat_map(|p| p.stages.iter().map(|s| s.control_string.as_str()))
            .collect();
        if let Some(ped) = &pedestrian_control {
            reachable.push(ped.as_str());
        }
        reachable.sort_unstable();
        reachable.dedup();
        validate_transitions(reachable.iter().copied())?;

        let intergreen = f64::from(geometry.intergreen);
        let min_green_time = options.min_green_multiplier * intergreen;
        let max_green_time = options.max_green_multiplier * intergreen;

        let channel = BroadcastChannel::new(
            ChannelConfig::from(&options),
            geometry.position,
            *geometry.region(),
            ChaCha8Rng::seed_from_u64(seed),
        );
        let sequencer = StageSequencer::new(
            junction,
            TransitionTimings::from_intergreen(geometry.intergreen, &options),
        );

        Ok(Self {
            state: ControllerState {
                mode: Mode::Inter,
                current_stage_index: 0,
                stage_time: min_green_time,
                last_stage_change_ms: 0,
                pedestrian_stage_active: false,
                stages_since_last_call: Vec::new(),
                min_green_time,
                max_green_time,
                current_control: String::new(),
                next_stall_check_ms: None,
                stages_since_pedestrian: 0,
            },
            geometry,
            options,
            plans,
            pedestrian_control,
            channel,
            sequencer,
            policy,
            metrics: ControllerMetrics::default(),
            current_active_lanes: Vec::new(),
            current_period: 0.0,
            started: false,
        })
    }

    pub fn junction(&self) -> &JunctionId {
        &self.geometry.junction
    }

    pub fn geometry(&self) -> &JunctionGeometry {
        &self.geometry
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn metrics(&self) -> ControllerMetrics {
        self.metrics
    }

    pub fn channel(&self) -> &BroadcastChannel {
        &self.channel
    }

    pub fn sequencer(&self) -> &StageSequencer {
        &self.sequencer
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Runs one decision step at simulation time `now_ms`.
    ///
    /// Only structural errors are returned; a controller built by [`Self::new`]
    /// has had every reachable transition validated, so in practice this
    /// never fails.
    pub fn decide(
        &mut self,
        now_ms: u64,
        observations: &Observations,
        actuator: &mut impl LightActuator,
    ) -> Result<StepReport, ConfigError> {
        let mut issued = false;
        if !self.started {
            issued |= self.start(now_ms, actuator);
        }
        let now_s = now_ms as f64 / 1000.0;

        self.clamp_stage_time();
        self.state.mode = mode_at(now_s);

        self.channel.update(&observations.vehicles, now_s);
        let tracked = self.channel.receive().len();

        if !self.state.pedestrian_stage_active {
            self.update_timing(now_ms, observations, tracked);
        }

        self.maybe_switch_stage(now_ms)?;
        issued |= self.sequencer.advance(now_ms, actuator);

        self.metrics.steps += 1;
        self.metrics.tracked_vehicle_steps += tracked as u64;

        Ok(StepReport {
            time_ms: now_ms,
            junction: self.geometry.junction.clone(),
            mode: self.state.mode,
            stage_index: self.state.current_stage_index,
            pedestrian_stage_active: self.state.pedestrian_stage_active,
            tracked_vehicles: tracked,
            congestion: self.channel.congestion(),
            seconds_since_stage_change: self.elapsed_s(now_ms),
            stage_time: self.state.stage_time,
            transition_active: self.sequencer.is_active(),
            light_command_issued: issued,
        })
    }

    /// Shows the first stage of the current mode's plan.
    fn start(&mut self, now_ms: u64, actuator: &mut impl LightActuator) -> bool {
        let mode = mode_at(now_ms as f64 / 1000.0);
        let plan = &self.plans[mode.index()];
        let first = &plan.stages[0];
        tracing::info!(
            junction = %self.geometry.junction,
            stage = %first.id,
            ?mode,
            intergreen = self.geometry.intergreen,
            "controller started"
        );
        self.state.mode = mode;
        self.state.current_stage_index = 0;
        self.state.current_control = first.control_string.clone();
        self.state.stages_since_last_call = vec![0; plan.stages.len()];
        self.state.stages_since_pedestrian = 1;
        self.current_active_lanes = plan.active_lanes[0].clone();
        self.current_period = first.period;
        self.restart_stage(now_ms, self.state.min_green_time);
        self.started = true;
        self.sequencer.apply(&self.state.current_control, actuator)
    }

    fn elapsed_s(&self, now_ms: u64) -> f64 {
        now_ms.saturating_sub(self.state.last_stage_change_ms) as f64 / 1000.0
    }

    fn clamp_stage_time(&mut self) {
        self.state.stage_time = self
            .state
            .stage_time
            .clamp(self.state.min_green_time, self.state.max_green_time);
    }

    fn restart_stage(&mut self, now_ms: u64, stage_time: f64) {
        self.state.last_stage_change_ms = now_ms;
        self.state.stage_time = stage_time;
        self.state.next_stall_check_ms = None;
    }

    /// Commits at least `delta` more seconds from `elapsed`, never shortening
    /// what is already committed, within the green bounds.
    pub fn update_stage_time(&mut self, delta: f64, elapsed: f64) {
        let committed = self.state.stage_time - elapsed;
        self.state.stage_time = (elapsed + delta.max(committed))
            .clamp(self.state.min_green_time, self.state.max_green_time);
    }

    /// Ends the stage as soon as allowed: at `elapsed`, but not before min green.
    fn truncate_stage_time(&mut self, elapsed: f64) {
        let floor = elapsed
            .max(self.state.min_green_time)
            .min(self.state.max_green_time);
        if floor < self.state.stage_time {
            tracing::debug!(
                junction = %self.geometry.junction,
                from = self.state.stage_time,
                to = floor,
                "stalled queue, truncating stage"
            );
            self.state.stage_time = floor;
            self.metrics.stall_truncations += 1;
        }
    }

    fn update_timing(&mut self, now_ms: u64, observations: &Observations, tracked: usize) {
        let now_s = now_ms as f64 / 1000.0;
        let elapsed = self.elapsed_s(now_ms);
        let remaining = self.state.stage_time - elapsed;

        if remaining <= self.options.extension_window_seconds {
            self.extend_near_end(now_s, elapsed, observations, tracked);
        } else if elapsed <= JUST_SWITCHED_S && tracked > 0 {
            self.seed_from_queue(elapsed);
        } else if elapsed > self.state.min_green_time && tracked > 0 && self.stall_check_due(now_ms) {
            self.check_for_stall(now_ms, elapsed);
        }
    }

    fn gps_evidence(&self, now_s: f64) -> GpsEvidence {
        evidence::gps_extension(
            &self.geometry,
            &self.current_active_lanes,
            self.channel.receive(),
            now_s,
            self.options.extension_window_seconds,
        )
    }

    fn extend_near_end(&mut self, now_s: f64, elapsed: f64, observations: &Observations, tracked: usize) {
        let loop_ext = evidence::loop_extension(
            &self.geometry,
            &self.current_active_lanes,
            observations,
            self.options.extend_time_seconds,
            self.options.loop_dark_threshold_seconds,
        );

        let gps = (tracked > 0).then(|| self.gps_evidence(now_s));
        match gps {
            Some(GpsEvidence::Stalled) => {
                self.truncate_stage_time(elapsed);
                return;
            }
            Some(GpsEvidence::Extend(_)) => self.metrics.gps_extensions += 1,
            Some(GpsEvidence::Rejected(raw)) => {
                tracing::debug!(
                    junction = %self.geometry.junction,
                    extension = raw,
                    "implausible gps extension discarded"
                );
                self.metrics.gps_rejections += 1;
            }
            Some(GpsEvidence::NoVehicle) | None => {}
        }
        let gps_ext = gps.and_then(GpsEvidence::extension);

        let delta = match (loop_ext, gps_ext) {
            (None, None) => self.current_period - elapsed,
            (loop_ext, gps_ext) => loop_ext.unwrap_or(0.0).max(gps_ext.unwrap_or(0.0)),
        };
        self.update_stage_time(delta, elapsed);
    }

    fn seed_from_queue(&mut self, elapsed: f64) {
        let Some(queue_m) = evidence::queue_length(
            &self.geometry,
            &self.current_active_lanes,
            self.channel.receive(),
        ) else {
            return;
        };
        let seconds = evidence::queue_discharge_seconds(queue_m, self.options.seconds_per_meter_queue);
        tracing::debug!(
            junction = %self.geometry.junction,
            queue_m,
            seconds,
            "seeding stage time from queue"
        );
        self.metrics.queue_seeds += 1;
        // Discharge time counts from the start of the stage.
        self.update_stage_time(seconds - elapsed, elapsed);
    }

    fn stall_check_due(&self, now_ms: u64) -> bool {
        self.state.next_stall_check_ms.is_none_or(|due| now_ms >= due)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn check_for_stall(&mut self, now_ms: u64, elapsed: f64) {
        let interval_ms = (self.options.stall_check_interval_seconds * 1000.0).round() as u64;
        self.state.next_stall_check_ms = Some(now_ms + interval_ms);
        if self.gps_evidence(now_ms as f64 / 1000.0) == GpsEvidence::Stalled {
            self.truncate_stage_time(elapsed);
        }
    }

    fn pedestrian_due(&self, stage_count: usize) -> bool {
        self.pedestrian_control.is_some()
            && !self.state.pedestrian_stage_active
            && self.state.stages_since_pedestrian >= stage_count
    }

    fn stage_demand(&self, mode_idx: usize) -> Vec<usize> {
        let per_lane = evidence::lane_counts(&self.geometry, self.channel.receive());
        self.plans[mode_idx]
            .active_lanes
            .iter()
            .map(|lanes| lanes.iter().map(|&l| per_lane[l]).sum())
            .collect()
    }

    fn maybe_switch_stage(&mut self, now_ms: u64) -> Result<bool, ConfigError> {
        if self.sequencer.is_active() {
            return Ok(false);
        }
        if self.elapsed_s(now_ms) + TIME_EPSILON_S < self.state.stage_time {
            return Ok(false);
        }

        let mode_idx = self.state.mode.index();
        let stage_count = self.plans[mode_idx].stages.len();
        let current = self.state.current_stage_index % stage_count;
        if self.state.stages_since_last_call.len() != stage_count {
            self.state.stages_since_last_call.resize(stage_count, 0);
        }

        if self.pedestrian_due(stage_count) {
            return self.begin_pedestrian_stage(now_ms);
        }

        let demand = self.stage_demand(mode_idx);
        let ctx = StageContext {
            mode: self.state.mode,
            current,
            stage_count,
            stages_since_last_call: &self.state.stages_since_last_call,
            demand: &demand,
        };
        let next = self.policy.choose_next_stage(&ctx) % stage_count;
        let stage = &self.plans[mode_idx].stages[next];

        if !self.state.pedestrian_stage_active && stage.control_string == self.state.current_control {
            // Same indications re-selected: restart the timer, no transition.
            self.state.current_stage_index = next;
            self.mark_served(next);
            self.restart_stage(now_ms, self.state.min_green_time);
            return Ok(false);
        }

        self.sequencer
            .begin(&self.state.current_control, &stage.control_string, now_ms)?;

        tracing::info!(
            junction = %self.geometry.junction,
            from = %self.state.current_control,
            to = %stage.control_string,
            stage = %stage.id,
            policy = self.policy.name(),
            "stage switch"
        );

        self.state.current_control = stage.control_string.clone();
        self.current_period = stage.period;
        self.current_active_lanes = self.plans[mode_idx].active_lanes[next].clone();
        self.state.current_stage_index = next;
        self.state.pedestrian_stage_active = false;
        self.mark_served(next);
        self.metrics.stage_switches += 1;
        self.restart_stage(now_ms, self.state.min_green_time);
        Ok(true)
    }

    /// Resets the wait counter of the stage now served and ages the rest.
    fn mark_served(&mut self, served: usize) {
        for (i, count) in self.state.stages_since_last_call.iter_mut().enumerate() {
            *count = if i == served { 0 } else { *count + 1 };
        }
        self.state.stages_since_pedestrian += 1;
    }

    fn begin_pedestrian_stage(&mut self, now_ms: u64) -> Result<bool, ConfigError> {
        let Some(target) = self.pedestrian_control.clone() else {
            return Ok(false);
        };
        self.sequencer
            .begin(&self.state.current_control, &target, now_ms)?;
        tracing::info!(
            junction = %self.geometry.junction,
            from = %self.state.current_control,
            "pedestrian stage"
        );
        self.state.current_control = target;
        self.current_active_lanes.clear();
        self.state.pedestrian_stage_active = true;
        self.state.stages_since_pedestrian = 0;
        self.metrics.pedestrian_stages += 1;
        let walk = self
            .options
            .pedestrian_walk_seconds
            .clamp(self.state.min_green_time, self.state.max_green_time);
        self.restart_stage(now_ms, walk);
        Ok(true)
    }
}

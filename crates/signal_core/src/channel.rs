//! Broadcast channel emulation for one junction's V2X catchment.
//!
//! Each step three snapshots exist: `transmit` (freshly sampled), `channel`
//! (on the air, one step older) and `receive` (what the controller reads, one
//! step older again). `receive(t) == channel(t-1)` always holds. Generation is
//! rate-limited per vehicle by a decentralized congestion control interval
//! chosen from the receive-set size.

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;
use crate::{
    heading_delta, CongestionState, ControllerOptions, Point, VehicleCategory, VehicleId,
    VehicleObservation, VehicleReport,
};

/// Subcarriers assumed available on the control channel.
pub const SUBCARRIERS: usize = 52;
pub const T_GEN_CAM_MIN_S: f64 = 0.1;
pub const T_GEN_CAM_MAX_S: f64 = 1.0;
/// Keep-alive generations after which `T_GenCam` falls back to the maximum.
pub const N_GEN_CAM_MAX: u32 = 3;
pub const POSITION_TRIGGER_M: f64 = 4.0;
pub const HEADING_TRIGGER_DEG: f64 = 4.0;
pub const SPEED_TRIGGER_MPS: f64 = 0.5;
/// 3σ ≈ 5 m.
pub const POSITION_NOISE_SIGMA_M: f64 = 5.0 / 3.0;
/// 3σ ≈ 20°.
pub const HEADING_NOISE_SIGMA_DEG: f64 = 20.0 / 3.0;

const TIME_EPSILON_S: f64 = 1e-6;

/// Congestion state for a receive set of `received` reports.
pub fn congestion_state(received: usize) -> CongestionState {
    let load = received as f64;
    let capacity = SUBCARRIERS as f64;
    if load <= 0.75 * capacity {
        CongestionState::Relaxed
    } else if load >= 1.5 * capacity {
        CongestionState::Restrictive
    } else {
        CongestionState::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Kinematics changed enough to publish; NGC resets.
    Content,
    /// Published to keep the report alive; NGC increments.
    KeepAlive,
    Suppressed,
}

/// Decides whether `next` is published given the last received report `prev`.
pub fn generation_decision(prev: &VehicleReport, next: &VehicleReport, dcc_interval: f64) -> Generation {
    let dt = next.generation_time - prev.generation_time + TIME_EPSILON_S;
    let t_gen_cam = if next.ngc > N_GEN_CAM_MAX {
        T_GEN_CAM_MAX_S
    } else {
        prev.gen_interval.clamp(T_GEN_CAM_MIN_S, T_GEN_CAM_MAX_S)
    };

    let content_changed = prev.position.distance(next.position) > POSITION_TRIGGER_M
        || heading_delta(prev.heading, next.heading) > HEADING_TRIGGER_DEG
        || (prev.speed - next.speed).abs() > SPEED_TRIGGER_MPS;

    if content_changed && dt >= dcc_interval {
        Generation::Content
    } else if dt >= dcc_interval || dt >= t_gen_cam {
        Generation::KeepAlive
    } else {
        Generation::Suppressed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub scan_range_meters: f64,
    pub packet_error_rate: f64,
    pub positional_noise_enabled: bool,
    pub heading_noise_enabled: bool,
    pub tracked_category: VehicleCategory,
    pub fixed_dcc_interval: Option<f64>,
}

impl From<&ControllerOptions> for ChannelConfig {
    fn from(options: &ControllerOptions) -> Self {
        Self {
            scan_range_meters: options.scan_range_meters,
            packet_error_rate: options.packet_error_rate,
            positional_noise_enabled: options.positional_noise_enabled,
            heading_noise_enabled: options.heading_noise_enabled,
            tracked_category: options.tracked_category,
            fixed_dcc_interval: options.fixed_dcc_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub content_generations: u64,
    pub keep_alive_generations: u64,
    pub suppressed: u64,
    pub lost: u64,
}

pub type Snapshot = BTreeMap<VehicleId, VehicleReport>;

#[derive(Debug, Clone)]
pub struct BroadcastChannel {
    config: ChannelConfig,
    centre: Point,
    region: BoundingBox,
    rng: ChaCha8Rng,
    transmit: Snapshot,
    channel: Snapshot,
    receive: Snapshot,
    congestion: CongestionState,
    dcc_interval: f64,
    stats: ChannelStats,
}

impl BroadcastChannel {
    pub fn new(config: ChannelConfig, centre: Point, region: BoundingBox, rng: ChaCha8Rng) -> Self {
        let congestion = CongestionState::Relaxed;
        let dcc_interval = config
            .fixed_dcc_interval
            .unwrap_or_else(|| congestion.min_interval());
        Self {
            config,
            centre,
            region,
            rng,
            transmit: Snapshot::new(),
            channel: Snapshot::new(),
            receive: Snapshot::new(),
            congestion,
            dcc_interval,
            stats: ChannelStats::default(),
        }
    }

    /// Advances the channel by one step.
    pub fn update(&mut self, raw: &BTreeMap<VehicleId, VehicleObservation>, now_s: f64) {
        self.receive = std::mem::take(&mut self.channel);

        self.congestion = congestion_state(self.receive.len());
        self.dcc_interval = self
            .config
            .fixed_dcc_interval
            .unwrap_or_else(|| self.congestion.min_interval());

        self.channel = self.propagate();
        self.transmit = self.sample(raw, now_s);
    }

    /// Builds the next on-air snapshot from the previous transmit set.
    fn propagate(&mut self) -> Snapshot {
        let mut channel = Snapshot::new();
        for (id, sent) in &self.transmit {
            // Drawn for every vehicle so the stream does not depend on PER.
            let draw: f64 = self.rng.gen();
            if draw < self.config.packet_error_rate {
                self.stats.lost += 1;
                continue;
            }
            let Some(prev) = self.receive.get(id) else {
                let mut report = sent.clone();
                report.ngc = 0;
                report.gen_interval = T_GEN_CAM_MAX_S;
                self.stats.content_generations += 1;
                channel.insert(id.clone(), report);
                continue;
            };
            match generation_decision(prev, sent, self.dcc_interval) {
                Generation::Content => {
                    let mut report = sent.clone();
                    report.ngc = 0;
                    report.gen_interval = sent.generation_time - prev.generation_time;
                    self.stats.content_generations += 1;
                    channel.insert(id.clone(), report);
                }
                Generation::KeepAlive => {
                    let mut report = sent.clone();
                    report.ngc = sent.ngc + 1;
                    report.gen_interval = sent.generation_time - prev.generation_time;
                    self.stats.keep_alive_generations += 1;
                    channel.insert(id.clone(), report);
                }
                Generation::Suppressed => {
                    self.stats.suppressed += 1;
                    channel.insert(id.clone(), prev.clone());
                }
            }
        }
        channel
    }

    /// Samples raw observations of tracked vehicles inside the catchment.
    fn sample(&mut self, raw: &BTreeMap<VehicleId, VehicleObservation>, now_s: f64) -> Snapshot {
        let mut transmit = Snapshot::new();
        for (id, obs) in raw {
            if obs.category != self.config.tracked_category {
                continue;
            }
            if !obs.is_well_formed() {
                tracing::debug!(vehicle = %id, "skipping malformed observation");
                continue;
            }
            if obs.position.distance(self.centre) > self.config.scan_range_meters
                || !self.region.contains(obs.position)
            {
                continue;
            }

            let mut position = obs.position;
            if self.config.positional_noise_enabled {
                let dx: f64 = self.rng.sample(StandardNormal);
                let dy: f64 = self.rng.sample(StandardNormal);
                position.x += dx * POSITION_NOISE_SIGMA_M;
                position.y += dy * POSITION_NOISE_SIGMA_M;
            }
            let mut heading = obs.heading;
            if self.config.heading_noise_enabled {
                let dh: f64 = self.rng.sample(StandardNormal);
                heading = (heading + dh * HEADING_NOISE_SIGMA_DEG).rem_euclid(360.0);
            }

            let (ngc, gen_interval) = self
                .channel
                .get(id)
                .map_or((0, T_GEN_CAM_MAX_S), |r| (r.ngc, r.gen_interval));

            transmit.insert(
                id.clone(),
                VehicleReport {
                    id: id.clone(),
                    position,
                    heading,
                    speed: obs.speed,
                    generation_time: now_s,
                    lane: obs.lane.clone(),
                    turn_signals: obs.turn_signals,
                    ngc,
                    gen_interval,
                },
            );
        }
        transmit
    }

    pub fn transmit(&self) -> &Snapshot {
        &self.transmit
    }

    pub fn channel(&self) -> &Snapshot {
        &self.channel
    }

    pub fn receive(&self) -> &Snapshot {
        &self.receive
    }

    pub fn congestion(&self) -> CongestionState {
        self.congestion
    }

    /// Minimum inter-generation interval applied this step.
    pub fn dcc_interval(&self) -> f64 {
        self.dcc_interval
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}

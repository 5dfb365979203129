//! Next-stage policies for [`signal_core::AdaptiveController`].
//!
//! The core ships only [`RoundRobin`]; the policies here look at per-stage
//! demand from the broadcast receive set and at how long each stage has gone
//! unserved.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use signal_core::{RoundRobin, StageContext, StagePolicy};

/// Serves the stage with the highest `demand + starvation_weight × waited`.
///
/// `waited` is the number of switches since the stage was last served, so a
/// stage with no tracked demand still wins eventually. The current stage is
/// only re-selected when it is the only stage. Ties go to the stage that
/// comes first after the current one in plan order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandWeighted {
    pub starvation_weight: f64,
}

impl Default for DemandWeighted {
    fn default() -> Self {
        Self {
            starvation_weight: 2.0,
        }
    }
}

impl StagePolicy for DemandWeighted {
    fn choose_next_stage(&mut self, ctx: &StageContext<'_>) -> usize {
        let count = ctx.stage_count.max(1);
        let mut best: Option<(usize, f64)> = None;
        for offset in 1..count {
            let idx = (ctx.current + offset) % count;
            let demand = ctx.demand.get(idx).copied().unwrap_or(0) as f64;
            let waited = f64::from(ctx.stages_since_last_call.get(idx).copied().unwrap_or(0));
            let score = demand + self.starvation_weight * waited;
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((idx, score));
            }
        }
        best.map_or(ctx.current % count, |(idx, _)| idx)
    }

    fn name(&self) -> &'static str {
        "demand_weighted"
    }
}

/// Skips stages with no tracked demand, but never one that has already been
/// passed over `max_skips` switches in a row.
///
/// When nothing qualifies it falls back to plan order, so loss of all
/// broadcast data degrades to round robin rather than holding a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationGated {
    pub max_skips: u32,
}

impl Default for ActivationGated {
    fn default() -> Self {
        Self { max_skips: 3 }
    }
}

impl StagePolicy for ActivationGated {
    fn choose_next_stage(&mut self, ctx: &StageContext<'_>) -> usize {
        let count = ctx.stage_count.max(1);
        (1..count)
            .map(|offset| (ctx.current + offset) % count)
            .find(|&idx| {
                ctx.demand.get(idx).copied().unwrap_or(0) > 0
                    || ctx.stages_since_last_call.get(idx).copied().unwrap_or(0) >= self.max_skips
            })
            .unwrap_or((ctx.current + 1) % count)
    }

    fn name(&self) -> &'static str {
        "activation_gated"
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    RoundRobin,
    DemandWeighted,
    ActivationGated,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [
        PolicyKind::RoundRobin,
        PolicyKind::DemandWeighted,
        PolicyKind::ActivationGated,
    ];

    /// A fresh policy instance with default parameters.
    pub fn build(self) -> Box<dyn StagePolicy> {
        match self {
            PolicyKind::RoundRobin => Box::new(RoundRobin),
            PolicyKind::DemandWeighted => Box::new(DemandWeighted::default()),
            PolicyKind::ActivationGated => Box::new(ActivationGated::default()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::RoundRobin => "round_robin",
            PolicyKind::DemandWeighted => "demand_weighted",
            PolicyKind::ActivationGated => "activation_gated",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown policy '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

use crate::Mode;

/// What a next-stage policy may look at when the current stage expires.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub mode: Mode,
    /// Index of the vehicle stage being left (or resumed after a pedestrian stage).
    pub current: usize,
    pub stage_count: usize,
    /// Stage switches since each stage was last served.
    pub stages_since_last_call: &'a [u32],
    /// Tracked vehicles on each stage's green approaches.
    pub demand: &'a [usize],
}

/// Chooses the next stage index. Results are taken modulo the stage count.
pub trait StagePolicy: Send {
    fn choose_next_stage(&mut self, ctx: &StageContext<'_>) -> usize;

    fn name(&self) -> &'static str;
}

/// Serves stages in plan order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl StagePolicy for RoundRobin {
    fn choose_next_stage(&mut self, ctx: &StageContext<'_>) -> usize {
        (ctx.current + 1) % ctx.stage_count.max(1)
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

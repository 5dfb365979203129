use crate::{EdgeId, JunctionId, LaneId, LoopId, Mode, StageId};

/// Structural configuration failures.
///
/// These indicate a corrupt model definition and are never recovered from.
/// Missing or unusable evidence is not an error; it is modelled as `Option`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("stage string length mismatch: '{current}' cannot transition to '{target}'")]
    LengthMismatch { current: String, target: String },
    #[error("no transition defined from '{from}' to '{to}' at link {link}")]
    UnmappedTransition { from: char, to: char, link: usize },
    #[error("transition requested at junction '{0}' while another is active")]
    TransitionInProgress(JunctionId),
    #[error("junction '{junction}' has no plan for mode {mode:?}")]
    MissingPlan { junction: JunctionId, mode: Mode },
    #[error("junction '{junction}' plan for mode {mode:?} has no stages")]
    EmptyPlan { junction: JunctionId, mode: Mode },
    #[error("stage '{stage}' at junction '{junction}' has {actual} links, junction controls {expected}")]
    StageLinkCount {
        junction: JunctionId,
        stage: StageId,
        expected: usize,
        actual: usize,
    },
    #[error("unknown junction '{0}'")]
    UnknownJunction(JunctionId),
    #[error("junction '{0}' controls no links")]
    NoControlledLinks(JunctionId),
    #[error("unknown lane '{lane}' referenced by {context}")]
    UnknownLane { lane: LaneId, context: String },
    #[error("unknown edge '{edge}' referenced by {context}")]
    UnknownEdge { edge: EdgeId, context: String },
    #[error("lane '{0}' needs at least two shape points")]
    DegenerateLane(LaneId),
    #[error("loop '{0}' is declared more than once")]
    DuplicateLoop(LoopId),
    #[error("invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

//! `signal_core` — adaptive traffic-signal control, one controller per junction.
//!
//! No IO. Time is passed in by the caller; all randomness comes from a seeded
//! per-controller RNG, so identical inputs replay identically.

pub mod channel;
pub mod controller;
mod error;
pub mod evidence;
pub mod geometry;
mod mode;
pub mod policy;
pub mod sequencer;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

pub use channel::{BroadcastChannel, ChannelConfig, ChannelStats};
pub use controller::{validate_options, AdaptiveController, ControllerMetrics, ControllerState};
pub use error::ConfigError;
pub use geometry::{get_intergreen, JunctionGeometry};
pub use mode::mode_at;
pub use policy::{RoundRobin, StageContext, StagePolicy};
pub use sequencer::{LightActuator, StageSequencer, TransitionPlan, TransitionTimings};
pub use types::*;

#[cfg(test)]
mod tests;

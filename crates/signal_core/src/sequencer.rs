//! Amber / all-red / amber stage transitions.
//!
//! A transition from one control string to another always passes through
//! every safety phase: amber1 → all-red → amber2 → target. Phases are never
//! skipped; a zero-length phase simply occupies no time band.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ControllerOptions, JunctionId};

/// Receives light-state commands for a junction.
///
/// Implementations may assume the core never sends the string already applied.
pub trait LightActuator {
    fn set_light_state(&mut self, junction: &JunctionId, state: &str);
}

/// Per-link phase characters for a `current → target` pair:
/// `[amber1, all_red, amber2]`.
pub fn transition_chars(current: char, target: char) -> Option<[char; 3]> {
    let chars = match (current, target) {
        ('r', 'r') => ['r', 'r', 'r'],
        ('G', 'G') => ['G', 'G', 'G'],
        ('g', 'g' | 'G') | ('G', 'g') => ['g', 'g', 'g'],
        ('G' | 'g', 'r') => ['y', 'r', 'r'],
        ('r', 'G' | 'g') => ['r', 'r', 'u'],
        _ => return None,
    };
    Some(chars)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionTimings {
    pub amber1_ms: u64,
    pub all_red_ms: u64,
    pub amber2_ms: u64,
}

impl TransitionTimings {
    /// Amber then all-red fill the intergreen; red-amber precedes the new green.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_intergreen(intergreen_s: u32, options: &ControllerOptions) -> Self {
        let to_ms = |s: f64| (s.max(0.0) * 1000.0).round() as u64;
        let all_red = (f64::from(intergreen_s) - options.amber_seconds).max(options.min_all_red_seconds);
        Self {
            amber1_ms: to_ms(options.amber_seconds),
            all_red_ms: to_ms(all_red),
            amber2_ms: to_ms(options.red_amber_seconds),
        }
    }

    pub fn total_ms(&self) -> u64 {
        self.amber1_ms + self.all_red_ms + self.amber2_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerPhase {
    Inactive,
    Amber1,
    AllRed,
    Amber2,
}

/// The light strings a transition will show, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPlan {
    pub amber1: String,
    pub all_red: String,
    pub amber2: String,
    pub target: String,
}

impl TransitionPlan {
    pub fn build(current: &str, target: &str) -> Result<Self, ConfigError> {
        if current.chars().count() != target.chars().count() {
            return Err(ConfigError::LengthMismatch {
                current: current.to_string(),
                target: target.to_string(),
            });
        }
        let mut plan = Self {
            amber1: String::with_capacity(current.len()),
            all_red: String::with_capacity(current.len()),
            amber2: String::with_capacity(current.len()),
            target: target.to_string(),
        };
        for (link, (from, to)) in current.chars().zip(target.chars()).enumerate() {
            let [amber1, all_red, amber2] = transition_chars(from, to)
                .ok_or(ConfigError::UnmappedTransition { from, to, link })?;
            plan.amber1.push(amber1);
            plan.all_red.push(all_red);
            plan.amber2.push(amber2);
        }
        Ok(plan)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionState {
    pub plan: TransitionPlan,
    pub start_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StageSequencer {
    junction: JunctionId,
    timings: TransitionTimings,
    transition: Option<TransitionState>,
    last_applied: Option<String>,
    commands_issued: u64,
    commands_elided: u64,
}

impl StageSequencer {
    pub fn new(junction: JunctionId, timings: TransitionTimings) -> Self {
        Self {
            junction,
            timings,
            transition: None,
            last_applied: None,
            commands_issued: 0,
            commands_elided: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.transition.is_some()
    }

    pub fn transition(&self) -> Option<&TransitionState> {
        self.transition.as_ref()
    }

    pub fn timings(&self) -> TransitionTimings {
        self.timings
    }

    pub fn last_applied(&self) -> Option<&str> {
        self.last_applied.as_deref()
    }

    pub fn commands_issued(&self) -> u64 {
        self.commands_issued
    }

    pub fn commands_elided(&self) -> u64 {
        self.commands_elided
    }

    /// Starts a transition. Fails without side effects on a structural error.
    pub fn begin(&mut self, current: &str, target: &str, start_ms: u64) -> Result<(), ConfigError> {
        if self.is_active() {
            return Err(ConfigError::TransitionInProgress(self.junction.clone()));
        }
        let plan = TransitionPlan::build(current, target)?;
        self.transition = Some(TransitionState { plan, start_ms });
        Ok(())
    }

    pub fn phase_at(&self, now_ms: u64) -> SequencerPhase {
        let Some(transition) = &self.transition else {
            return SequencerPhase::Inactive;
        };
        let elapsed = now_ms.saturating_sub(transition.start_ms);
        let t = self.timings;
        if elapsed < t.amber1_ms {
            SequencerPhase::Amber1
        } else if elapsed < t.amber1_ms + t.all_red_ms {
            SequencerPhase::AllRed
        } else if elapsed < t.total_ms() {
            SequencerPhase::Amber2
        } else {
            SequencerPhase::Inactive
        }
    }

    /// Applies the string due at `now_ms`; completes the transition once its
    /// full duration has elapsed. Returns whether a command was sent.
    pub fn advance(&mut self, now_ms: u64, actuator: &mut impl LightActuator) -> bool {
        let phase = self.phase_at(now_ms);
        let Some(transition) = &self.transition else {
            return false;
        };
        let plan = &transition.plan;
        let state = match phase {
            SequencerPhase::Amber1 => plan.amber1.clone(),
            SequencerPhase::AllRed => plan.all_red.clone(),
            SequencerPhase::Amber2 => plan.amber2.clone(),
            SequencerPhase::Inactive => plan.target.clone(),
        };
        if phase == SequencerPhase::Inactive {
            self.transition = None;
        }
        self.apply(&state, actuator)
    }

    /// Sends `state` unless it is already the applied string.
    pub fn apply(&mut self, state: &str, actuator: &mut impl LightActuator) -> bool {
        if self.last_applied.as_deref() == Some(state) {
            tracing::debug!(junction = %self.junction, state, "light command elided");
            self.commands_elided += 1;
            return false;
        }
        actuator.set_light_state(&self.junction, state);
        self.last_applied = Some(state.to_string());
        self.commands_issued += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::RecordingActuator;

    fn sequencer() -> StageSequencer {
        StageSequencer::new(
            JunctionId::from("J0"),
            TransitionTimings {
                amber1_ms: 3000,
                all_red_ms: 2000,
                amber2_ms: 3000,
            },
        )
    }

    #[test]
    fn green_to_red_walks_every_phase() {
        let mut seq = sequencer();
        let mut actuator = RecordingActuator::default();
        seq.apply("GG", &mut actuator);
        seq.begin("GG", "rr", 10_000).unwrap();

        let expected = [
            (10_000, "yy", true),
            (12_999, "yy", true),
            (13_000, "rr", true),
            (14_999, "rr", true),
            (15_000, "rr", true),
            (17_999, "rr", true),
        ];
        for (now, state, active) in expected {
            seq.advance(now, &mut actuator);
            assert_eq!(seq.last_applied(), Some(state), "at {now}");
            assert_eq!(seq.is_active(), active, "at {now}");
        }
        seq.advance(18_000, &mut actuator);
        assert_eq!(seq.last_applied(), Some("rr"));
        assert!(!seq.is_active());

        // Only GG, yy and rr were ever sent.
        assert_eq!(actuator.states(), vec!["GG", "yy", "rr"]);
    }

    #[test]
    fn unchanged_strings_are_elided() {
        let mut seq = sequencer();
        let mut actuator = RecordingActuator::default();
        assert!(seq.apply("Gr", &mut actuator));
        assert!(!seq.apply("Gr", &mut actuator));
        assert_eq!(seq.commands_issued(), 1);
        assert_eq!(seq.commands_elided(), 1);
        assert_eq!(actuator.commands.len(), 1);
    }

    #[test]
    fn red_to_green_shows_red_amber() {
        let plan = TransitionPlan::build("Gr", "rG").unwrap();
        assert_eq!(plan.amber1, "yr");
        assert_eq!(plan.all_red, "rr");
        assert_eq!(plan.amber2, "ru");
        assert_eq!(plan.target, "rG");
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut seq = sequencer();
        let err = seq.begin("GGr", "rr", 0).unwrap_err();
        assert!(matches!(err, ConfigError::LengthMismatch { .. }));
        assert!(!seq.is_active());
    }

    #[test]
    fn every_basic_pair_is_mapped() {
        for from in ['r', 'g', 'G'] {
            for to in ['r', 'g', 'G'] {
                let chars = transition_chars(from, to);
                assert!(chars.is_some(), "{from}{to} unmapped");
                let plan = TransitionPlan::build(&from.to_string(), &to.to_string()).unwrap();
                assert_eq!(plan.amber1.len() + plan.all_red.len() + plan.amber2.len(), 3);
            }
        }
    }

    #[test]
    fn unknown_characters_fail_loudly() {
        let err = TransitionPlan::build("Gy", "rr").unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnmappedTransition {
                from: 'y',
                to: 'r',
                link: 1
            }
        );
    }

    #[test]
    fn second_begin_while_active_is_refused() {
        let mut seq = sequencer();
        seq.begin("G", "r", 0).unwrap();
        assert_eq!(
            seq.begin("r", "G", 100),
            Err(ConfigError::TransitionInProgress(JunctionId::from("J0")))
        );
    }

    #[test]
    fn advance_is_noop_when_inactive() {
        let mut seq = sequencer();
        let mut actuator = RecordingActuator::default();
        assert!(!seq.advance(5000, &mut actuator));
        assert!(actuator.commands.is_empty());
    }

    #[test]
    fn timings_from_intergreen() {
        let timings = TransitionTimings::from_intergreen(7, &ControllerOptions::default());
        assert_eq!(timings.amber1_ms, 3000);
        assert_eq!(timings.all_red_ms, 4000);
        assert_eq!(timings.amber2_ms, 2000);

        let tight = TransitionTimings::from_intergreen(3, &ControllerOptions::default());
        assert_eq!(tight.all_red_ms, 1000);
    }
}

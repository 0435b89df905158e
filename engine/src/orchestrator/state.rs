//! Loop state machine
//!
//! The orchestrator never mutates its state directly; every change goes
//! through [`transition`], a pure function over an explicit table. Anything
//! not in the table is an [`InvalidTransition`].
//!
//! ```text
//! Idle -Start-> Perceiving -Advance-> Reasoning -Advance-> Executing
//!      -Advance-> Reflecting -Advance-> Storing -Advance-> Complete
//!
//! <stage> -Fail-> Error{stage} -Recover-> Recovery{stage} -Resume-> <next stage>
//!                              -Abort---> Failed{stage}
//! ```
//!
//! Only execution, reflection and storage can recover. Perception and
//! reasoning failures are loop-fatal.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Perception,
    Reasoning,
    Execution,
    Reflection,
    Storage,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Perception => "perception",
            Stage::Reasoning => "reasoning",
            Stage::Execution => "execution",
            Stage::Reflection => "reflection",
            Stage::Storage => "storage",
        }
    }

    /// Whether a failure in this stage can be absorbed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Stage::Execution | Stage::Reflection | Stage::Storage)
    }

    /// The state the loop is in while this stage runs
    pub fn active_state(&self) -> LoopState {
        match self {
            Stage::Perception => LoopState::Perceiving,
            Stage::Reasoning => LoopState::Reasoning,
            Stage::Execution => LoopState::Executing,
            Stage::Reflection => LoopState::Reflecting,
            Stage::Storage => LoopState::Storing,
        }
    }

    /// The state that follows this stage
    pub fn next_state(&self) -> LoopState {
        match self {
            Stage::Perception => LoopState::Reasoning,
            Stage::Reasoning => LoopState::Executing,
            Stage::Execution => LoopState::Reflecting,
            Stage::Reflection => LoopState::Storing,
            Stage::Storage => LoopState::Complete,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Perceiving,
    Reasoning,
    Executing,
    Reflecting,
    Storing,
    Complete,
    Error { stage: Stage },
    Recovery { stage: Stage },
    Failed { stage: Stage },
}

impl LoopState {
    /// The stage running in this state, if any
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            LoopState::Perceiving => Some(Stage::Perception),
            LoopState::Reasoning => Some(Stage::Reasoning),
            LoopState::Executing => Some(Stage::Execution),
            LoopState::Reflecting => Some(Stage::Reflection),
            LoopState::Storing => Some(Stage::Storage),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Complete | LoopState::Failed { .. })
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => f.write_str("idle"),
            LoopState::Perceiving => f.write_str("perceiving"),
            LoopState::Reasoning => f.write_str("reasoning"),
            LoopState::Executing => f.write_str("executing"),
            LoopState::Reflecting => f.write_str("reflecting"),
            LoopState::Storing => f.write_str("storing"),
            LoopState::Complete => f.write_str("complete"),
            LoopState::Error { stage } => write!(f, "error({})", stage),
            LoopState::Recovery { stage } => write!(f, "recovery({})", stage),
            LoopState::Failed { stage } => write!(f, "failed({})", stage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Start,
    /// Current stage finished
    Advance,
    /// Current stage raised an error
    Fail,
    /// Degrade and keep going
    Recover,
    /// Give up
    Abort,
    /// Leave recovery for the next stage
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from} on {trigger:?}")]
pub struct InvalidTransition {
    pub from: LoopState,
    pub trigger: Trigger,
}

/// Apply `trigger` to `state`
pub fn transition(state: LoopState, trigger: Trigger) -> Result<LoopState, InvalidTransition> {
    let next = match (state, trigger) {
        (LoopState::Idle, Trigger::Start) => Some(LoopState::Perceiving),
        (active, Trigger::Advance) => active.active_stage().map(|s| s.next_state()),
        (active, Trigger::Fail) => active
            .active_stage()
            .map(|stage| LoopState::Error { stage }),
        (LoopState::Error { stage }, Trigger::Recover) if stage.is_recoverable() => {
            Some(LoopState::Recovery { stage })
        }
        (LoopState::Error { stage }, Trigger::Abort) => Some(LoopState::Failed { stage }),
        (active, Trigger::Abort) => active
            .active_stage()
            .map(|stage| LoopState::Failed { stage }),
        (LoopState::Recovery { stage }, Trigger::Resume) => Some(stage.next_state()),
        _ => None,
    };

    next.ok_or(InvalidTransition {
        from: state,
        trigger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = transition(LoopState::Idle, Trigger::Start).unwrap();
        let mut visited = vec![state];
        while !state.is_terminal() {
            state = transition(state, Trigger::Advance).unwrap();
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                LoopState::Perceiving,
                LoopState::Reasoning,
                LoopState::Executing,
                LoopState::Reflecting,
                LoopState::Storing,
                LoopState::Complete,
            ]
        );
    }

    #[test]
    fn test_recoverable_stage_resumes_at_next() {
        let state = transition(LoopState::Executing, Trigger::Fail).unwrap();
        assert_eq!(
            state,
            LoopState::Error {
                stage: Stage::Execution
            }
        );
        let state = transition(state, Trigger::Recover).unwrap();
        let state = transition(state, Trigger::Resume).unwrap();
        assert_eq!(state, LoopState::Reflecting);

        let state = transition(LoopState::Storing, Trigger::Fail).unwrap();
        let state = transition(state, Trigger::Recover).unwrap();
        assert_eq!(transition(state, Trigger::Resume).unwrap(), LoopState::Complete);
    }

    #[test]
    fn test_fatal_stages_cannot_recover() {
        for stage in [Stage::Perception, Stage::Reasoning] {
            let error = LoopState::Error { stage };
            assert!(transition(error, Trigger::Recover).is_err());
            assert_eq!(
                transition(error, Trigger::Abort).unwrap(),
                LoopState::Failed { stage }
            );
        }
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let triggers = [
            Trigger::Start,
            Trigger::Advance,
            Trigger::Fail,
            Trigger::Recover,
            Trigger::Abort,
            Trigger::Resume,
        ];
        for state in [
            LoopState::Complete,
            LoopState::Failed {
                stage: Stage::Reasoning,
            },
        ] {
            for trigger in triggers {
                assert!(transition(state, trigger).is_err(), "{} on {:?}", state, trigger);
            }
        }
    }

    #[test]
    fn test_idle_only_starts() {
        assert!(transition(LoopState::Idle, Trigger::Advance).is_err());
        assert!(transition(LoopState::Idle, Trigger::Fail).is_err());
        assert!(transition(LoopState::Reasoning, Trigger::Start).is_err());
    }

    #[test]
    fn test_state_serializes_with_stage() {
        let json = serde_json::to_value(LoopState::Failed {
            stage: Stage::Perception,
        })
        .unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["stage"], "perception");
    }
}

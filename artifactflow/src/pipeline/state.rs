//! Job states and their legal transitions.

use crate::classify::FailureCategory;
use crate::core::StageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a job is in its run.
///
/// `Completed`, `Halted` and `Cancelled` are terminal. Pipeline failures are
/// represented here as values, never as Rust errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// The stage is next and has not started.
    Pending {
        /// The stage.
        stage: StageId,
    },
    /// The stage's worker is running.
    Running {
        /// The stage.
        stage: StageId,
    },
    /// The stage failed; the next state depends on its criticality.
    StageFailed {
        /// The stage.
        stage: StageId,
        /// Why it failed.
        category: FailureCategory,
    },
    /// The stage's outputs validated, or were already valid.
    StageSucceeded {
        /// The stage.
        stage: StageId,
    },
    /// Every stage succeeded or was skipped with a warning.
    Completed,
    /// A critical stage failed.
    Halted {
        /// The stage.
        stage: StageId,
        /// Why it failed.
        category: FailureCategory,
    },
    /// The job was cancelled before or during the stage.
    Cancelled {
        /// The stage.
        stage: StageId,
    },
}

impl JobState {
    /// Returns true for `Completed`, `Halted` and `Cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Halted { .. } | Self::Cancelled { .. })
    }

    /// The stage this state refers to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&StageId> {
        match self {
            Self::Pending { stage }
            | Self::Running { stage }
            | Self::StageFailed { stage, .. }
            | Self::StageSucceeded { stage }
            | Self::Halted { stage, .. }
            | Self::Cancelled { stage } => Some(stage),
            Self::Completed => None,
        }
    }

    /// The failure category, for failed and halted states.
    #[must_use]
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            Self::StageFailed { category, .. } | Self::Halted { category, .. } => Some(*category),
            _ => None,
        }
    }

    /// The state's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Running { .. } => "running",
            Self::StageFailed { .. } => "stage_failed",
            Self::StageSucceeded { .. } => "stage_succeeded",
            Self::Completed => "completed",
            Self::Halted { .. } => "halted",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Returns true if moving from `self` to `next` is legal.
    ///
    /// Within a stage the stage id must not change; `Pending` after a
    /// finished stage must name a different stage.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        let same = |a: &StageId| next.stage() == Some(a);
        let other = |a: &StageId| next.stage().is_some_and(|b| b != a);
        match (self, next) {
            (Self::Pending { stage }, Self::Running { .. } | Self::StageSucceeded { .. })
            | (Self::Pending { stage }, Self::StageFailed { .. } | Self::Cancelled { .. })
            | (Self::Running { stage }, Self::StageSucceeded { .. } | Self::StageFailed { .. })
            | (Self::Running { stage }, Self::Cancelled { .. })
            | (Self::StageFailed { stage, .. }, Self::Halted { .. }) => same(stage),
            (Self::StageFailed { stage, .. } | Self::StageSucceeded { stage }, Self::Pending { .. }) => {
                other(stage)
            }
            (Self::StageFailed { .. } | Self::StageSucceeded { .. }, Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::StageFailed { stage, category } | Self::Halted { stage, category } => {
                write!(f, "{}({stage}, {category})", self.name())
            }
            Self::Pending { stage }
            | Self::Running { stage }
            | Self::StageSucceeded { stage }
            | Self::Cancelled { stage } => write!(f, "{}({stage})", self.name()),
        }
    }
}

/// A transition rejected by [`JobState::can_transition_to`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Illegal job state transition: {from} -> {to}")]
pub struct InvalidTransition {
    /// The current state.
    pub from: JobState,
    /// The requested state.
    pub to: JobState,
}

/// A job's current state plus every state it has been in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachine {
    current: JobState,
    history: Vec<JobState>,
}

impl StateMachine {
    /// Starts at `Pending(first)`.
    #[must_use]
    pub fn new(first: StageId) -> Self {
        let initial = JobState::Pending { stage: first };
        Self {
            current: initial.clone(),
            history: vec![initial],
        }
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> &JobState {
        &self.current
    }

    /// Every state so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] and leaves the state unchanged if the
    /// move is illegal.
    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.current.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.current.clone(),
                to: next,
            });
        }
        self.history.push(next.clone());
        self.current = next;
        Ok(())
    }

    /// Consumes the machine, returning the final state and the history.
    #[must_use]
    pub fn into_parts(self) -> (JobState, Vec<JobState>) {
        (self.current, self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::OutputViolation;
    use crate::testing::sid;
    use pretty_assertions::assert_eq;

    fn pending(s: &str) -> JobState {
        JobState::Pending { stage: sid(s) }
    }

    #[test]
    fn test_happy_path() {
        let mut machine = StateMachine::new(sid("a"));
        machine.transition(JobState::Running { stage: sid("a") }).unwrap();
        machine.transition(JobState::StageSucceeded { stage: sid("a") }).unwrap();
        machine.transition(pending("b")).unwrap();
        machine.transition(JobState::StageSucceeded { stage: sid("b") }).unwrap();
        machine.transition(JobState::Completed).unwrap();

        assert!(machine.current().is_terminal());
        assert_eq!(machine.history().len(), 6);
    }

    #[test]
    fn test_failure_paths() {
        let category = FailureCategory::OutputContractViolation(OutputViolation::Missing);
        let failed = JobState::StageFailed { stage: sid("a"), category };

        assert!(JobState::Running { stage: sid("a") }.can_transition_to(&failed));
        assert!(failed.can_transition_to(&JobState::Halted { stage: sid("a"), category }));
        assert!(failed.can_transition_to(&pending("b")));
        assert!(failed.can_transition_to(&JobState::Completed));
        assert!(!failed.can_transition_to(&JobState::Halted { stage: sid("b"), category }));
        assert!(!failed.can_transition_to(&pending("a")));
    }

    #[test]
    fn test_illegal_transitions() {
        let mut machine = StateMachine::new(sid("a"));
        let err = machine.transition(JobState::Completed).unwrap_err();
        assert_eq!(err.from, pending("a"));
        assert_eq!(machine.current(), &pending("a"));

        assert!(!pending("a").can_transition_to(&JobState::Running { stage: sid("b") }));
        assert!(!JobState::Completed.can_transition_to(&pending("a")));
        let halted = JobState::Halted {
            stage: sid("a"),
            category: FailureCategory::ProcessTimeout,
        };
        assert!(!halted.can_transition_to(&pending("b")));
    }

    #[test]
    fn test_cancel_from_pending_and_running() {
        let cancelled = JobState::Cancelled { stage: sid("a") };
        assert!(pending("a").can_transition_to(&cancelled));
        assert!(JobState::Running { stage: sid("a") }.can_transition_to(&cancelled));
        assert!(!JobState::StageSucceeded { stage: sid("a") }.can_transition_to(&cancelled));
        assert!(cancelled.is_terminal());
    }

    #[test]
    fn test_display_and_accessors() {
        let halted = JobState::Halted {
            stage: sid("b"),
            category: FailureCategory::OutputContractViolation(OutputViolation::Malformed),
        };
        assert_eq!(halted.to_string(), "halted(b, OutputMalformed)");
        assert_eq!(halted.stage(), Some(&sid("b")));
        assert_eq!(
            halted.category(),
            Some(FailureCategory::OutputContractViolation(OutputViolation::Malformed))
        );
        assert_eq!(JobState::Completed.to_string(), "completed");
        assert_eq!(JobState::Completed.stage(), None);
    }

    #[test]
    fn test_serializes_with_state_tag() {
        let json = serde_json::to_value(pending("a")).unwrap();
        assert_eq!(json, serde_json::json!({"state": "pending", "stage": "a"}));
    }
}

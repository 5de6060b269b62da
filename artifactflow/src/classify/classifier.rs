//! Maps process exits and artifact records onto failure categories.

use super::category::{FailureCategory, OutputViolation};
use crate::core::{ArtifactRecord, ProcessExit};
use serde::{Deserialize, Serialize};

/// What the state machine does with a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The job stops at the failing stage.
    Halt,
    /// The failure is recorded as a warning and the job moves on.
    SkipWithWarning,
}

/// Interprets failures. Stateless; every decision is a pure function of its
/// inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    /// Classifies how a worker ended.
    ///
    /// Returns `None` for a clean exit and for cancellation, which is a
    /// terminal job state rather than a stage failure. A worker that could not
    /// be started counts as a non-zero exit.
    #[must_use]
    pub fn classify_exit(exit: &ProcessExit) -> Option<FailureCategory> {
        match exit {
            ProcessExit::Exited { code: 0 } | ProcessExit::Cancelled { .. } => None,
            ProcessExit::Exited { .. } | ProcessExit::SpawnFailed { .. } => {
                Some(FailureCategory::ProcessNonZeroExit)
            }
            ProcessExit::TimedOut { .. } => Some(FailureCategory::ProcessTimeout),
            ProcessExit::Signaled { .. } => Some(FailureCategory::ProcessCrashSignal),
        }
    }

    /// Classifies a failed declared output. Passing records have no category.
    #[must_use]
    pub fn classify_output(record: &ArtifactRecord) -> Option<FailureCategory> {
        OutputViolation::from_reason(record.reason).map(FailureCategory::OutputContractViolation)
    }

    /// Classifies a failed required input. Passing records have no category.
    #[must_use]
    pub fn classify_input(record: &ArtifactRecord) -> Option<FailureCategory> {
        (!record.passed_validation()).then_some(FailureCategory::MissingInput)
    }

    /// Decides whether a failure halts the job.
    #[must_use]
    pub fn disposition(category: FailureCategory, critical: bool) -> Disposition {
        if critical || category == FailureCategory::ConfigurationError {
            Disposition::Halt
        } else {
            Disposition::SkipWithWarning
        }
    }
}

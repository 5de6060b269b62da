//! Process exits and stage outcomes.

use super::{ArtifactRecord, StageId};
use crate::classify::FailureCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a supervised child process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessExit {
    /// The process exited on its own with a status code.
    Exited {
        /// The exit code.
        code: i32,
    },
    /// The process was terminated by a signal it did not receive from us.
    Signaled {
        /// The signal number.
        signal: i32,
    },
    /// The wall-clock timeout elapsed and the process group was killed.
    TimedOut {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
    /// The job was cancelled while the process ran; the group was killed.
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
    /// The process could not be started.
    SpawnFailed {
        /// The spawn error.
        message: String,
    },
}

impl ProcessExit {
    /// Returns true only for exit code 0.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signaled { signal } => write!(f, "terminated by signal {signal}"),
            Self::TimedOut { timeout_ms } => write!(f, "timed out after {timeout_ms} ms"),
            Self::Cancelled { reason } => write!(f, "cancelled: {reason}"),
            Self::SpawnFailed { message } => write!(f, "failed to spawn: {message}"),
        }
    }
}

/// Combined stdout/stderr of a child, bounded to the most recent bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    /// The retained tail of the output (lossy UTF-8).
    pub text: String,
    /// How many earlier bytes were dropped to respect the bound.
    pub truncated_bytes: u64,
}

impl CapturedOutput {
    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.truncated_bytes == 0
    }

    /// Returns the last `lines` lines of the retained text.
    #[must_use]
    pub fn tail_lines(&self, lines: usize) -> String {
        let all: Vec<&str> = self.text.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// What the supervisor reports for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// The stage that was invoked.
    pub stage: StageId,
    /// When the process was started.
    pub started_at: DateTime<Utc>,
    /// When the process ended (or was reaped after a kill).
    pub ended_at: DateTime<Utc>,
    /// How it ended.
    pub exit: ProcessExit,
    /// Captured combined output.
    pub output: CapturedOutput,
}

impl ProcessOutcome {
    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// The result of one stage step as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The stage.
    pub stage: StageId,
    /// When the step started.
    pub started_at: DateTime<Utc>,
    /// When the step ended.
    pub ended_at: DateTime<Utc>,
    /// Process exit, if a worker was invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ProcessExit>,
    /// Failure category, if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FailureCategory>,
    /// Records for every artifact inspected in this step.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    /// True when the stage was resumed from existing artifacts.
    #[serde(default)]
    pub skipped: bool,
    /// Captured worker output.
    #[serde(default, skip_serializing_if = "CapturedOutput::is_empty")]
    pub output: CapturedOutput,
}

impl StageOutcome {
    /// Creates an outcome for a stage that was resumed from valid artifacts.
    #[must_use]
    pub fn skipped(stage: StageId, artifacts: Vec<ArtifactRecord>) -> Self {
        let now = Utc::now();
        Self {
            stage,
            started_at: now,
            ended_at: now,
            exit: None,
            category: None,
            artifacts,
            skipped: true,
            output: CapturedOutput::default(),
        }
    }

    /// Returns true if the step has no failure category.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.category.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_exit_success() {
        assert!(ProcessExit::Exited { code: 0 }.is_success());
        assert!(!ProcessExit::Exited { code: 2 }.is_success());
        assert!(!ProcessExit::Signaled { signal: 11 }.is_success());
        assert!(!ProcessExit::TimedOut { timeout_ms: 10 }.is_success());
    }

    #[test]
    fn test_process_exit_display() {
        assert_eq!(ProcessExit::Exited { code: 3 }.to_string(), "exited with code 3");
        assert_eq!(
            ProcessExit::TimedOut { timeout_ms: 1500 }.to_string(),
            "timed out after 1500 ms"
        );
    }

    #[test]
    fn test_process_exit_serialize() {
        let json = serde_json::to_value(ProcessExit::Signaled { signal: 9 }).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "signaled", "signal": 9}));
    }

    #[test]
    fn test_captured_output_tail_lines() {
        let output = CapturedOutput {
            text: "one\ntwo\nthree\nfour".to_string(),
            truncated_bytes: 0,
        };
        assert_eq!(output.tail_lines(2), "three\nfour");
        assert_eq!(output.tail_lines(10), "one\ntwo\nthree\nfour");
    }

    #[test]
    fn test_skipped_outcome() {
        let outcome = StageOutcome::skipped(StageId::new("a").unwrap(), Vec::new());
        assert!(outcome.skipped);
        assert!(outcome.is_success());
        assert!(outcome.exit.is_none());
    }
}

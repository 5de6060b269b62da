//! Structured failure diagnostics.

use super::category::FailureCategory;
use super::classifier::{Classifier, Disposition};
use crate::core::{ArtifactRecord, ArtifactRole, CapturedOutput, ProcessExit, ReasonCode, StageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Worker output lines quoted in a diagnostic.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Everything an operator needs to act on one stage failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// The job.
    pub job_id: String,
    /// The failing stage.
    pub stage: StageId,
    /// The category.
    pub category: FailureCategory,
    /// Halt or continue.
    pub disposition: Disposition,
    /// Whether re-running resumes here after the operator's fix.
    pub rerunnable: bool,
    /// The failing role, for input and output failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ArtifactRole>,
    /// The failing artifact path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// The validator's reason code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    /// How the worker ended, if it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ProcessExit>,
    /// Human-readable explanation.
    pub diagnostic: String,
    /// Bounded worker output.
    #[serde(default)]
    pub output: CapturedOutput,
}

impl FailureReport {
    fn base(job_id: &str, stage: &StageId, category: FailureCategory, critical: bool) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage: stage.clone(),
            category,
            disposition: Classifier::disposition(category, critical),
            rerunnable: category.is_rerunnable(),
            role: None,
            path: None,
            reason: None,
            exit: None,
            diagnostic: String::new(),
            output: CapturedOutput::default(),
        }
    }

    /// Report for a required input that failed validation.
    #[must_use]
    pub fn missing_input(job_id: &str, stage: &StageId, critical: bool, record: &ArtifactRecord) -> Self {
        let mut report = Self::base(job_id, stage, FailureCategory::MissingInput, critical);
        report.role = Some(record.role.clone());
        report.path = Some(record.path.clone());
        report.reason = Some(record.reason);
        report.diagnostic = format!(
            "stage '{stage}' cannot start: required input {}",
            record.describe()
        );
        report
    }

    /// Report for a worker that ended badly.
    #[must_use]
    pub fn process(
        job_id: &str,
        stage: &StageId,
        critical: bool,
        category: FailureCategory,
        exit: &ProcessExit,
        output: CapturedOutput,
    ) -> Self {
        let mut report = Self::base(job_id, stage, category, critical);
        let mut diagnostic = format!("worker for stage '{stage}' {exit}");
        append_tail(&mut diagnostic, &output);
        report.exit = Some(exit.clone());
        report.diagnostic = diagnostic;
        report.output = output;
        report
    }

    /// Report for a declared output that failed validation after a clean exit.
    #[must_use]
    pub fn output(
        job_id: &str,
        stage: &StageId,
        critical: bool,
        category: FailureCategory,
        record: &ArtifactRecord,
        exit: &ProcessExit,
        output: CapturedOutput,
    ) -> Self {
        let mut report = Self::base(job_id, stage, category, critical);
        let mut diagnostic = format!(
            "worker for stage '{stage}' {exit} but output {}",
            record.describe()
        );
        append_tail(&mut diagnostic, &output);
        report.role = Some(record.role.clone());
        report.path = Some(record.path.clone());
        report.reason = Some(record.reason);
        report.exit = Some(exit.clone());
        report.diagnostic = diagnostic;
        report.output = output;
        report
    }

    /// Report for an orchestrator-side fault while preparing the stage.
    #[must_use]
    pub fn configuration(job_id: &str, stage: &StageId, message: impl Into<String>) -> Self {
        let mut report = Self::base(job_id, stage, FailureCategory::ConfigurationError, true);
        report.diagnostic = message.into();
        report
    }
}

fn append_tail(diagnostic: &mut String, output: &CapturedOutput) {
    if output.is_empty() {
        return;
    }
    let _ = write!(diagnostic, "\n--- last output");
    if output.truncated_bytes > 0 {
        let _ = write!(diagnostic, " ({} earlier bytes dropped)", output.truncated_bytes);
    }
    let _ = write!(diagnostic, " ---\n{}", output.tail_lines(DIAGNOSTIC_TAIL_LINES));
}

/// Diagnostic written when a job halts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltReport {
    /// The job.
    pub job_id: String,
    /// The job root.
    pub job_root: PathBuf,
    /// When the job halted.
    pub halted_at: DateTime<Utc>,
    /// Stages that had valid artifacts when the job halted.
    pub completed_stages: Vec<StageId>,
    /// The failure that halted the job.
    pub failure: FailureReport,
}

impl HaltReport {
    /// Creates a halt report.
    #[must_use]
    pub fn new(job_root: PathBuf, completed_stages: Vec<StageId>, failure: FailureReport) -> Self {
        Self {
            job_id: failure.job_id.clone(),
            job_root,
            halted_at: Utc::now(),
            completed_stages,
            failure,
        }
    }

    /// The stage the job halted at.
    #[must_use]
    pub fn stage(&self) -> &StageId {
        &self.failure.stage
    }

    /// The failure category.
    #[must_use]
    pub fn category(&self) -> FailureCategory {
        self.failure.category
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

//! The closed failure taxonomy.

use crate::core::ReasonCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a declared output broke its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputViolation {
    /// The artifact is absent or empty.
    Missing,
    /// The artifact exists but is structurally broken.
    Malformed,
    /// The artifact is well formed but in a different encoding than required.
    WrongFormat,
}

impl OutputViolation {
    /// Maps a validator reason code to a violation. `Ok` has none.
    #[must_use]
    pub fn from_reason(reason: ReasonCode) -> Option<Self> {
        match reason {
            ReasonCode::Ok => None,
            ReasonCode::Missing | ReasonCode::Empty => Some(Self::Missing),
            ReasonCode::WrongFormat => Some(Self::WrongFormat),
            ReasonCode::Unreadable
            | ReasonCode::TooSmall
            | ReasonCode::TooLarge
            | ReasonCode::BadSignature
            | ReasonCode::MissingFields
            | ReasonCode::Unparseable => Some(Self::Malformed),
        }
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FailureCategory {
    /// A required input was absent or failed validation.
    MissingInput,
    /// The worker exited non-zero, or could not be started.
    ProcessNonZeroExit,
    /// The worker exceeded its timeout.
    ProcessTimeout,
    /// The worker was killed by a signal it raised or received.
    ProcessCrashSignal,
    /// The worker exited 0 but a declared output failed validation.
    OutputContractViolation(OutputViolation),
    /// The registry or configuration is inconsistent.
    ConfigurationError,
}

impl FailureCategory {
    /// Every category, in taxonomy order.
    pub const ALL: [Self; 8] = [
        Self::MissingInput,
        Self::ProcessNonZeroExit,
        Self::ProcessTimeout,
        Self::ProcessCrashSignal,
        Self::OutputContractViolation(OutputViolation::Missing),
        Self::OutputContractViolation(OutputViolation::Malformed),
        Self::OutputContractViolation(OutputViolation::WrongFormat),
        Self::ConfigurationError,
    ];

    /// Stable name used in events, reports and logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MissingInput => "MissingInput",
            Self::ProcessNonZeroExit => "ProcessNonZeroExit",
            Self::ProcessTimeout => "ProcessTimeout",
            Self::ProcessCrashSignal => "ProcessCrashSignal",
            Self::OutputContractViolation(OutputViolation::Missing) => "OutputMissing",
            Self::OutputContractViolation(OutputViolation::Malformed) => "OutputMalformed",
            Self::OutputContractViolation(OutputViolation::WrongFormat) => "OutputWrongFormat",
            Self::ConfigurationError => "ConfigurationError",
        }
    }

    /// Whether re-running the job resumes at this stage once the operator has
    /// fixed the input, the tool or the environment.
    ///
    /// Configuration errors need a corrected registry and a restart instead.
    #[must_use]
    pub fn is_rerunnable(&self) -> bool {
        !matches!(self, Self::ConfigurationError)
    }

    /// Short operator hint for this category.
    #[must_use]
    pub fn operator_hint(&self) -> &'static str {
        match self {
            Self::MissingInput => "Restore or regenerate the upstream artifact, then re-run the job.",
            Self::ProcessNonZeroExit => "Inspect the worker output, fix the tool or its input, then re-run.",
            Self::ProcessTimeout => "Check the worker for hangs or raise the stage timeout, then re-run.",
            Self::ProcessCrashSignal => "The worker crashed; inspect its output and environment, then re-run.",
            Self::OutputContractViolation(OutputViolation::Missing) => {
                "The worker reported success without writing its output; fix the tool, then re-run."
            }
            Self::OutputContractViolation(OutputViolation::Malformed) => {
                "The output is corrupt or incomplete; fix the tool, then re-run."
            }
            Self::OutputContractViolation(OutputViolation::WrongFormat) => {
                "The output uses the wrong encoding; configure the tool's export format, then re-run."
            }
            Self::ConfigurationError => "Correct the registry definition and restart the orchestrator.",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<FailureCategory> for String {
    fn from(category: FailureCategory) -> Self {
        category.name().to_string()
    }
}

impl TryFrom<String> for FailureCategory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == value)
            .ok_or_else(|| format!("unknown failure category '{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping() {
        assert_eq!(OutputViolation::from_reason(ReasonCode::Ok), None);
        assert_eq!(
            OutputViolation::from_reason(ReasonCode::Missing),
            Some(OutputViolation::Missing)
        );
        assert_eq!(
            OutputViolation::from_reason(ReasonCode::Empty),
            Some(OutputViolation::Missing)
        );
        assert_eq!(
            OutputViolation::from_reason(ReasonCode::BadSignature),
            Some(OutputViolation::Malformed)
        );
        assert_eq!(
            OutputViolation::from_reason(ReasonCode::MissingFields),
            Some(OutputViolation::Malformed)
        );
        assert_eq!(
            OutputViolation::from_reason(ReasonCode::WrongFormat),
            Some(OutputViolation::WrongFormat)
        );
    }

    #[test]
    fn test_names_are_unique() {
        let names: std::collections::HashSet<_> =
            FailureCategory::ALL.iter().map(FailureCategory::name).collect();
        assert_eq!(names.len(), FailureCategory::ALL.len());
    }

    #[test]
    fn test_serde_uses_names() {
        let category = FailureCategory::OutputContractViolation(OutputViolation::WrongFormat);
        let json = serde_json::to_string(&category).unwrap();
        assert_eq!(json, "\"OutputWrongFormat\"");
        let back: FailureCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, category);
        assert!(serde_json::from_str::<FailureCategory>("\"Bogus\"").is_err());
    }

    #[test]
    fn test_rerunnable() {
        assert!(FailureCategory::ProcessTimeout.is_rerunnable());
        assert!(FailureCategory::MissingInput.is_rerunnable());
        assert!(!FailureCategory::ConfigurationError.is_rerunnable());
    }
}

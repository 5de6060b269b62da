//! Error types for the artifactflow orchestrator.
//!
//! Two families live here. Orchestrator faults (bad configuration, an
//! unresolvable role, a job root that cannot be created) are Rust errors and
//! propagate with `?`. Pipeline failures (a worker timing out, an output that
//! fails validation) are *values* carried by [`crate::pipeline::JobState`] and
//! [`crate::classify::FailureReport`]; they never surface as `Err`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for artifactflow operations.
#[derive(Debug, Error)]
pub enum ArtifactflowError {
    /// The registry or orchestrator configuration is inconsistent.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A role could not be resolved to a path.
    #[error("{0}")]
    Resolve(#[from] ResolveError),

    /// A job could not be created, opened or driven.
    #[error("{0}")]
    Job(#[from] JobError),

    /// The driver attempted an illegal state transition.
    #[error("{0}")]
    Transition(#[from] crate::pipeline::InvalidTransition),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ArtifactflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    ///
    /// The fix hint defaults to the registered suggestion for `code`, if any.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        let fix_hint = ContractSuggestions::get(&code).map(String::from);
        Self {
            code,
            summary: summary.into(),
            fix_hint,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when the stage contract registry or the orchestrator
/// configuration is inconsistent.
///
/// These are only ever produced at load time; a registry that loaded cleanly
/// never yields one while jobs run.
#[derive(Debug, Clone, Error)]
#[error("Configuration error: {message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// The artifact roles involved in the error.
    pub roles: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            roles: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the roles involved.
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if one was attached.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in stage graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            codes::CYCLE,
            format!("Stage graph contains a dependency cycle: {}", cycle_path.join(" -> ")),
        );

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for ConfigurationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            roles: Vec::new(),
            error_info: Some(err.error_info),
        }
    }
}

/// Errors raised by the artifact path resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The stage is not registered.
    #[error("Unknown stage: {stage}")]
    UnknownStage {
        /// The stage id.
        stage: String,
    },

    /// The stage neither produces nor requires the role.
    #[error("Stage '{stage}' has no contract for role '{role}'")]
    UnknownRole {
        /// The stage id.
        stage: String,
        /// The role name.
        role: String,
    },
}

/// Errors related to job lifecycle.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job identity is not a valid identifier.
    #[error("Invalid job id '{id}': {reason}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A job root must be absolute.
    #[error("Job root must be an absolute path: {}", path.display())]
    RelativeRoot {
        /// The rejected path.
        path: PathBuf,
    },

    /// A job root already exists and would be overwritten.
    #[error("Job root already exists: {}", path.display())]
    AlreadyExists {
        /// The existing root.
        path: PathBuf,
    },

    /// A job root does not exist.
    #[error("Job root not found: {}", path.display())]
    NotFound {
        /// The missing root.
        path: PathBuf,
    },

    /// The input asset handed to a new job is unusable.
    #[error("Input asset {} is unusable: {reason}", path.display())]
    InputAsset {
        /// The asset path.
        path: PathBuf,
        /// The reason.
        reason: String,
    },

    /// Another active job already owns this root.
    #[error("Job root {} is owned by active job '{owner}'", path.display())]
    RootInUse {
        /// The contended root.
        path: PathBuf,
        /// The job currently owning it.
        owner: String,
    },
}

impl JobError {
    /// Creates an invalid id error.
    #[must_use]
    pub fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Stable contract error codes.
pub mod codes {
    /// The registry has no stages.
    pub const EMPTY: &str = "CONTRACT-001-EMPTY";
    /// Two stages share an id or ordinal.
    pub const DUPLICATE_STAGE: &str = "CONTRACT-002-DUPLICATE_STAGE";
    /// A predecessor is not registered.
    pub const MISSING_DEP: &str = "CONTRACT-003-MISSING_DEP";
    /// The predecessor graph has a cycle.
    pub const CYCLE: &str = "CONTRACT-004-CYCLE";
    /// A required input has no upstream producer.
    pub const UNPRODUCED_INPUT: &str = "CONTRACT-005-UNPRODUCED_INPUT";
    /// A role is produced by more than one owner.
    pub const AMBIGUOUS_OWNER: &str = "CONTRACT-006-AMBIGUOUS_OWNER";
    /// Two roles resolve to the same path.
    pub const PATH_COLLISION: &str = "CONTRACT-007-PATH_COLLISION";
    /// A stage, role or file name is malformed.
    pub const INVALID_NAME: &str = "CONTRACT-008-INVALID_NAME";
    /// A command template references something undeclared.
    pub const INVALID_TEMPLATE: &str = "CONTRACT-009-INVALID_TEMPLATE";
    /// A critical stage depends on a non-critical stage's output.
    pub const OPTIONAL_DEPENDENCY: &str = "CONTRACT-010-OPTIONAL_DEPENDENCY";
    /// A stage timeout is zero.
    pub const INVALID_TIMEOUT: &str = "CONTRACT-011-INVALID_TIMEOUT";
    /// A role references an unknown definition.
    pub const UNKNOWN_ROLE: &str = "CONTRACT-012-UNKNOWN_ROLE";
    /// A configuration file could not be loaded.
    pub const CONFIG_LOAD: &str = "CONFIG-001-LOAD";
    /// A configuration value is out of range.
    pub const CONFIG_VALUE: &str = "CONFIG-002-INVALID_VALUE";
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            codes::EMPTY => Some("Declare at least one stage in the registry definition."),
            codes::DUPLICATE_STAGE => Some(
                "Every stage needs a unique id and a unique ordinal. \
                 Model alternate implementations as separately named stages.",
            ),
            codes::MISSING_DEP => Some(
                "Ensure every predecessor references a stage that exists in the registry. \
                 Check for typos in stage ids.",
            ),
            codes::CYCLE => Some("Remove one of the predecessor links in the cycle to break it."),
            codes::UNPRODUCED_INPUT => Some(
                "Add the producing stage to the predecessors, or declare the role as a job seed role.",
            ),
            codes::AMBIGUOUS_OWNER => Some(
                "Each output role must have exactly one producing stage. \
                 Rename one of the roles.",
            ),
            codes::PATH_COLLISION => Some("Give each role a distinct file name."),
            codes::INVALID_TEMPLATE => Some(
                "Command placeholders may only reference the stage's own input and output roles.",
            ),
            codes::OPTIONAL_DEPENDENCY => Some(
                "Mark the producing stage critical, or mark the consuming stage non-critical.",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("stage", "my_stage");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"my_stage".to_string()));
    }

    #[test]
    fn test_contract_error_info_default_hint() {
        let info = ContractErrorInfo::new(codes::PATH_COLLISION, "collision");
        assert_eq!(info.fix_hint.as_deref(), Some("Give each role a distinct file name."));
    }

    #[test]
    fn test_cycle_detected_error() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "a".to_string(),
        ]);

        assert!(err.to_string().contains("a -> b -> c -> a"));
        assert_eq!(err.error_info.code, codes::CYCLE);

        let config: ConfigurationError = err.into();
        assert_eq!(config.code(), Some(codes::CYCLE));
        assert_eq!(config.stages.len(), 4);
    }

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::new("stage 'x' is broken").with_stages(vec!["x".into()]);
        assert_eq!(err.to_string(), "Configuration error: stage 'x' is broken");
        assert!(err.code().is_none());
    }

    #[test]
    fn test_resolve_error_display() {
        let err = ResolveError::UnknownRole {
            stage: "merge".into(),
            role: "final-output".into(),
        };
        assert_eq!(err.to_string(), "Stage 'merge' has no contract for role 'final-output'");
    }

    #[test]
    fn test_contract_suggestions() {
        assert!(ContractSuggestions::get(codes::CYCLE).is_some());
        assert!(ContractSuggestions::get("UNKNOWN").is_none());
    }
}

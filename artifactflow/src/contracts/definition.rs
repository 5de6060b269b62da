//! Static stage and role declarations.
//!
//! These types are the serde form of a registry definition. They carry no
//! invariants of their own; [`super::StageContractRegistry::load`] checks them.

use crate::core::{ArtifactRole, StageId};
use crate::errors::{codes, ConfigurationError, ContractErrorInfo};
use crate::supervisor::CommandTemplate;
use crate::validation::ArtifactCheck;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_critical() -> bool {
    true
}

/// A named artifact slot and how its file is laid out and checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    /// The role name.
    pub role: ArtifactRole,
    /// Fixed file name inside the owning stage's directory.
    pub file_name: String,
    /// Structural checks run after the baseline check, in order.
    #[serde(default)]
    pub checks: Vec<ArtifactCheck>,
}

impl RoleSpec {
    /// Creates a role spec with no structural checks.
    #[must_use]
    pub fn new(role: ArtifactRole, file_name: impl Into<String>) -> Self {
        Self {
            role,
            file_name: file_name.into(),
            checks: Vec::new(),
        }
    }

    /// Appends a structural check.
    #[must_use]
    pub fn with_check(mut self, check: ArtifactCheck) -> Self {
        self.checks.push(check);
        self
    }
}

/// Immutable declaration of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage id.
    pub id: StageId,
    /// Position in the on-disk layout (`{ordinal:02}_{id}`). Zero is reserved
    /// for job seed roles.
    pub ordinal: u8,
    /// Stages that must succeed before this one starts.
    #[serde(default)]
    pub predecessors: Vec<StageId>,
    /// Roles this stage reads.
    #[serde(default)]
    pub inputs: Vec<ArtifactRole>,
    /// Roles this stage must produce.
    #[serde(default)]
    pub outputs: Vec<RoleSpec>,
    /// Wall-clock timeout in seconds.
    pub timeout_seconds: f64,
    /// Whether a failure halts the job.
    #[serde(default = "default_critical")]
    pub critical: bool,
    /// How the worker is launched.
    pub command: CommandTemplate,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl StageDefinition {
    /// Creates a critical stage with a 60 second timeout and no roles.
    #[must_use]
    pub fn new(id: StageId, ordinal: u8, command: CommandTemplate) -> Self {
        Self {
            id,
            ordinal,
            predecessors: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout_seconds: 60.0,
            critical: true,
            command,
            description: None,
        }
    }

    /// Adds a predecessor.
    #[must_use]
    pub fn with_predecessor(mut self, stage: StageId) -> Self {
        self.predecessors.push(stage);
        self
    }

    /// Adds a required input role.
    #[must_use]
    pub fn with_input(mut self, role: ArtifactRole) -> Self {
        self.inputs.push(role);
        self
    }

    /// Adds a produced output role.
    #[must_use]
    pub fn with_output(mut self, spec: RoleSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the critical flag.
    #[must_use]
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The timeout as a duration, or `None` unless it is positive and
    /// representable as a [`Duration`].
    #[must_use]
    pub fn checked_timeout(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .ok()
            .filter(|timeout| !timeout.is_zero())
    }

    /// The timeout as a duration. The registry only loads stages whose
    /// [`checked_timeout`](Self::checked_timeout) is `Some`, so this is never
    /// zero for a registered stage.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.checked_timeout().unwrap_or(Duration::ZERO)
    }

    /// Directory name of this stage inside a job root.
    #[must_use]
    pub fn dir_name(&self) -> String {
        format!("{:02}_{}", self.ordinal, self.id)
    }

    /// Returns true if this stage produces `role`.
    #[must_use]
    pub fn produces(&self, role: &ArtifactRole) -> bool {
        self.outputs.iter().any(|spec| &spec.role == role)
    }
}

/// A complete registry definition, as loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDefinition {
    /// Pipeline name.
    pub name: String,
    /// Roles supplied by the job itself rather than by a stage.
    #[serde(default)]
    pub seeds: Vec<RoleSpec>,
    /// Stage declarations.
    pub stages: Vec<StageDefinition>,
}

impl RegistryDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seeds: Vec::new(),
            stages: Vec::new(),
        }
    }

    /// Adds a seed role.
    #[must_use]
    pub fn with_seed(mut self, spec: RoleSpec) -> Self {
        self.seeds.push(spec);
        self
    }

    /// Adds a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Parses a definition from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document does not parse.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| {
            ConfigurationError::new(format!("Registry definition does not parse: {e}"))
                .with_error_info(ContractErrorInfo::new(
                    codes::CONFIG_LOAD,
                    "Unreadable registry definition",
                ))
        })
    }

    /// Reads and parses a definition from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::new(format!(
                "Cannot read registry definition {}: {e}",
                path.display()
            ))
            .with_error_info(
                ContractErrorInfo::new(codes::CONFIG_LOAD, "Unreadable registry definition")
                    .with_context_entry("path", path.display().to_string()),
            )
        })?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{role, sid};

    #[test]
    fn test_stage_definition_builder() {
        let stage = StageDefinition::new(sid("merge"), 4, CommandTemplate::new("merge-tool"))
            .with_predecessor(sid("skin"))
            .with_input(role("skin-weights"))
            .with_output(RoleSpec::new(role("merged"), "merged.fbx"))
            .with_timeout(Duration::from_millis(1500))
            .with_critical(false);

        assert_eq!(stage.dir_name(), "04_merge");
        assert_eq!(stage.timeout(), Duration::from_millis(1500));
        assert!(!stage.critical);
        assert!(stage.produces(&role("merged")));
        assert!(!stage.produces(&role("skin-weights")));
    }

    #[test]
    fn test_bad_timeout_is_zero() {
        let mut stage = StageDefinition::new(sid("a"), 1, CommandTemplate::new("true"));
        stage.timeout_seconds = -1.0;
        assert_eq!(stage.timeout(), Duration::ZERO);
        stage.timeout_seconds = f64::NAN;
        assert_eq!(stage.timeout(), Duration::ZERO);
    }

    #[test]
    fn test_definition_from_json() {
        let json = r#"{
            "name": "demo",
            "seeds": [{"role": "source", "file_name": "source.bin"}],
            "stages": [{
                "id": "convert",
                "ordinal": 1,
                "inputs": ["source"],
                "outputs": [{
                    "role": "converted",
                    "file_name": "out.bin",
                    "checks": [{"type": "size", "min_bytes": 4}]
                }],
                "timeout_seconds": 2.5,
                "command": {"program": "convert", "args": ["{input:source}", "{output:converted}"]}
            }]
        }"#;

        let def = RegistryDefinition::from_json(json).unwrap();
        assert_eq!(def.seeds.len(), 1);
        let stage = &def.stages[0];
        assert!(stage.critical);
        assert_eq!(stage.timeout(), Duration::from_millis(2500));
        assert_eq!(stage.outputs[0].checks.len(), 1);
    }

    #[test]
    fn test_definition_rejects_bad_names() {
        let json = r#"{"name": "x", "stages": [{"id": "Bad Id", "ordinal": 1,
            "timeout_seconds": 1, "command": {"program": "true"}}]}"#;
        let err = RegistryDefinition::from_json(json).unwrap_err();
        assert_eq!(err.code(), Some(codes::CONFIG_LOAD));
        assert!(err.message.contains("Invalid stage id"));
    }
}

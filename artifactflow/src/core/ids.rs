//! Validated identifiers for stages and artifact roles.

use crate::errors::{codes, ConfigurationError, ContractErrorInfo};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;

#[allow(clippy::expect_used)] // constant pattern
fn stage_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("stage id pattern is valid"))
}

#[allow(clippy::expect_used)] // constant pattern
fn role_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]{0,63}$").expect("role pattern is valid"))
}

fn invalid_name(kind: &str, value: &str, rule: &str) -> ConfigurationError {
    ConfigurationError::new(format!("Invalid {kind} '{value}': {rule}")).with_error_info(
        ContractErrorInfo::new(codes::INVALID_NAME, format!("Malformed {kind}"))
            .with_fix_hint(rule.to_string())
            .with_context_entry(kind, value),
    )
}

/// Identifier of a pipeline stage.
///
/// Lowercase ASCII, digits and underscores, starting with a letter. The id is
/// also the stage directory suffix in the on-disk layout, so it can never
/// contain a path separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageId(String);

impl StageId {
    /// Creates a validated stage id.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the id is malformed.
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigurationError> {
        let id = id.into();
        if stage_id_pattern().is_match(&id) {
            Ok(Self(id))
        } else {
            Err(invalid_name(
                "stage id",
                &id,
                "use 1-64 chars of [a-z0-9_], starting with a letter",
            ))
        }
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StageId {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.0
    }
}

impl Borrow<str> for StageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named logical slot an artifact fills, e.g. `skeleton-structure`.
///
/// Roles are globally unique across the registry. Lowercase ASCII, digits and
/// hyphens, starting with a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRole(String);

impl ArtifactRole {
    /// Creates a validated role name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the name is malformed.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if role_pattern().is_match(&name) {
            Ok(Self(name))
        } else {
            Err(invalid_name(
                "artifact role",
                &name,
                "use 1-64 chars of [a-z0-9-], starting with a letter",
            ))
        }
    }

    /// Returns the role as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the environment-variable form of the role (`SKINNING_WEIGHTS`).
    #[must_use]
    pub fn env_suffix(&self) -> String {
        self.0.to_ascii_uppercase().replace('-', "_")
    }
}

impl TryFrom<String> for ArtifactRole {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactRole> for String {
    fn from(role: ArtifactRole) -> Self {
        role.0
    }
}

impl Borrow<str> for ArtifactRole {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_id_valid() {
        let id = StageId::new("mesh_extraction").unwrap();
        assert_eq!(id.as_str(), "mesh_extraction");
        assert_eq!(id.to_string(), "mesh_extraction");
    }

    #[test]
    fn test_stage_id_rejects_separators() {
        assert!(StageId::new("../etc").is_err());
        assert!(StageId::new("a/b").is_err());
        assert!(StageId::new("").is_err());
        assert!(StageId::new("1stage").is_err());
    }

    #[test]
    fn test_role_valid() {
        let role = ArtifactRole::new("skinning-weights").unwrap();
        assert_eq!(role.env_suffix(), "SKINNING_WEIGHTS");
    }

    #[test]
    fn test_role_invalid_code() {
        let err = ArtifactRole::new("Final Output").unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_NAME));
    }

    #[test]
    fn test_role_serde_validates() {
        let role: ArtifactRole = serde_json::from_str(r#""final-output""#).unwrap();
        assert_eq!(role.as_str(), "final-output");

        let bad: Result<ArtifactRole, _> = serde_json::from_str(r#""final/output""#);
        assert!(bad.is_err());
    }
}

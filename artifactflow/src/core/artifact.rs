//! Artifact records produced by validation.

use super::ArtifactRole;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Why an artifact passed or failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// All checks passed.
    Ok,
    /// No file at the resolved path.
    Missing,
    /// The file exists but has zero bytes.
    Empty,
    /// The file exists but could not be read.
    Unreadable,
    /// Smaller than the role's minimum size.
    TooSmall,
    /// Larger than the role's maximum size.
    TooLarge,
    /// The header does not carry the expected signature.
    BadSignature,
    /// The header identifies a known alternate encoding of the expected
    /// format, e.g. ASCII FBX where binary FBX is required.
    WrongFormat,
    /// The container parsed but lacks required named fields.
    MissingFields,
    /// The container could not be parsed at all.
    Unparseable,
}

impl ReasonCode {
    /// Returns true for [`ReasonCode::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Missing => "missing",
            Self::Empty => "empty",
            Self::Unreadable => "unreadable",
            Self::TooSmall => "too_small",
            Self::TooLarge => "too_large",
            Self::BadSignature => "bad_signature",
            Self::WrongFormat => "wrong_format",
            Self::MissingFields => "missing_fields",
            Self::Unparseable => "unparseable",
        };
        f.write_str(s)
    }
}

/// The result of validating one artifact.
///
/// Records are transient: the state machine decides on them and then logs or
/// drops them. Only the optional status cache persists a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// The role that was validated.
    pub role: ArtifactRole,
    /// The resolved absolute path.
    pub path: PathBuf,
    /// Size in bytes (0 if missing).
    pub size_bytes: u64,
    /// Outcome of the checks.
    pub reason: ReasonCode,
    /// Detail for a failed check (e.g. which fields were missing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// SHA-256 of the content, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl ArtifactRecord {
    /// Creates a passing record.
    #[must_use]
    pub fn passed(role: ArtifactRole, path: PathBuf, size_bytes: u64) -> Self {
        Self {
            role,
            path,
            size_bytes,
            reason: ReasonCode::Ok,
            detail: None,
            sha256: None,
        }
    }

    /// Creates a failing record.
    #[must_use]
    pub fn failed(
        role: ArtifactRole,
        path: PathBuf,
        size_bytes: u64,
        reason: ReasonCode,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            role,
            path,
            size_bytes,
            reason,
            detail: Some(detail.into()),
            sha256: None,
        }
    }

    /// Returns true when every check passed.
    #[must_use]
    pub fn passed_validation(&self) -> bool {
        self.reason.is_ok()
    }

    /// Attaches a content digest.
    #[must_use]
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    /// One-line human description.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.detail {
            Some(detail) => format!(
                "{} at {} ({} bytes): {} - {}",
                self.role,
                self.path.display(),
                self.size_bytes,
                self.reason,
                detail
            ),
            None => format!(
                "{} at {} ({} bytes): {}",
                self.role,
                self.path.display(),
                self.size_bytes,
                self.reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role() -> ArtifactRole {
        ArtifactRole::new("final-output").unwrap()
    }

    #[test]
    fn test_passed_record() {
        let record = ArtifactRecord::passed(role(), PathBuf::from("/jobs/a/05_x/final.glb"), 42);
        assert!(record.passed_validation());
        assert_eq!(record.size_bytes, 42);
        assert!(record.detail.is_none());
    }

    #[test]
    fn test_failed_record_describe() {
        let record = ArtifactRecord::failed(
            role(),
            PathBuf::from("/jobs/a/05_x/final.glb"),
            0,
            ReasonCode::Missing,
            "no such file",
        );
        assert!(!record.passed_validation());
        let text = record.describe();
        assert!(text.contains("final-output"));
        assert!(text.contains("missing - no such file"));
    }

    #[test]
    fn test_reason_code_serialize() {
        let json = serde_json::to_string(&ReasonCode::WrongFormat).unwrap();
        assert_eq!(json, r#""wrong_format""#);
        assert_eq!(ReasonCode::BadSignature.to_string(), "bad_signature");
    }
}

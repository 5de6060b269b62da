//! The artifact validator.

use super::checks::StructuralCheck;
use crate::contracts::StageContractRegistry;
use crate::core::{ArtifactRecord, ArtifactRole, ReasonCode};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Inspects produced artifacts and reports pass/fail with a reason code.
///
/// Every role gets the baseline check (exists, is a regular file, non-empty)
/// followed by its declared structural checks in declaration order. The
/// first failing check decides the reason. The validator never modifies the
/// artifact.
#[derive(Debug, Default)]
pub struct ArtifactValidator {
    checks: HashMap<ArtifactRole, Vec<Box<dyn StructuralCheck>>>,
    compute_digest: bool,
}

impl ArtifactValidator {
    /// Creates a validator with no structural checks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator with the checks declared for every role in the
    /// registry.
    #[must_use]
    pub fn from_registry(registry: &StageContractRegistry) -> Self {
        let mut validator = Self::new();
        for spec in registry.role_specs() {
            for check in &spec.checks {
                validator = validator.with_check(spec.role.clone(), check.compile());
            }
        }
        validator
    }

    /// Appends a custom structural check for a role.
    #[must_use]
    pub fn with_check(mut self, role: ArtifactRole, check: Box<dyn StructuralCheck>) -> Self {
        self.checks.entry(role).or_default().push(check);
        self
    }

    /// Enables SHA-256 digests on passing records.
    #[must_use]
    pub fn with_digest(mut self, enabled: bool) -> Self {
        self.compute_digest = enabled;
        self
    }

    /// Returns the number of structural checks attached to a role.
    #[must_use]
    pub fn check_count(&self, role: &ArtifactRole) -> usize {
        self.checks.get(role).map_or(0, Vec::len)
    }

    /// Validates the artifact for `role` at `path`.
    #[must_use]
    pub fn validate(&self, role: &ArtifactRole, path: &Path) -> ArtifactRecord {
        let record = self.inspect(role, path);
        debug!(
            role = %role,
            path = %path.display(),
            size_bytes = record.size_bytes,
            reason = %record.reason,
            "Validated artifact"
        );
        record
    }

    fn inspect(&self, role: &ArtifactRole, path: &Path) -> ArtifactRecord {
        let fail = |size, reason, detail: String| {
            ArtifactRecord::failed(role.clone(), path.to_path_buf(), size, reason, detail)
        };

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return fail(0, ReasonCode::Missing, "no file at the resolved path".to_string());
            }
            Err(e) => return fail(0, ReasonCode::Unreadable, e.to_string()),
        };

        if !metadata.is_file() {
            return fail(0, ReasonCode::Unreadable, "not a regular file".to_string());
        }

        let size = metadata.len();
        if size == 0 {
            return fail(0, ReasonCode::Empty, "file has zero bytes".to_string());
        }

        for check in self.checks.get(role).into_iter().flatten() {
            if let Err(failure) = check.check(path, size) {
                return fail(size, failure.reason, format!("{}: {}", check.name(), failure.detail));
            }
        }

        let record = ArtifactRecord::passed(role.clone(), path.to_path_buf(), size);
        if !self.compute_digest {
            return record;
        }
        match sha256_file(path) {
            Ok(digest) => record.with_sha256(digest),
            Err(e) => fail(size, ReasonCode::Unreadable, e.to_string()),
        }
    }
}

/// Computes the hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ArtifactCheck;

    fn role(name: &str) -> ArtifactRole {
        ArtifactRole::new(name).unwrap()
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let validator = ArtifactValidator::new();
        let record = validator.validate(&role("final-output"), &dir.path().join("final.glb"));
        assert_eq!(record.reason, ReasonCode::Missing);
        assert_eq!(record.size_bytes, 0);
    }

    #[test]
    fn test_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.glb");
        std::fs::write(&path, b"").unwrap();
        let record = ArtifactValidator::new().validate(&role("final-output"), &path);
        assert_eq!(record.reason, ReasonCode::Empty);
    }

    #[test]
    fn test_directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let record = ArtifactValidator::new().validate(&role("final-output"), dir.path());
        assert_eq!(record.reason, ReasonCode::Unreadable);
    }

    #[test]
    fn test_baseline_passes_without_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let record = ArtifactValidator::new().validate(&role("a-out"), &path);
        assert!(record.passed_validation());
        assert_eq!(record.size_bytes, 10);
        assert!(record.sha256.is_none());
    }

    #[test]
    fn test_first_failing_check_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.glb");
        std::fs::write(&path, b"xx").unwrap();

        let r = role("a-out");
        let validator = ArtifactValidator::new()
            .with_check(r.clone(), ArtifactCheck::magic("glTF").compile())
            .with_check(
                r.clone(),
                ArtifactCheck::Size {
                    min_bytes: Some(100),
                    max_bytes: None,
                }
                .compile(),
            );
        assert_eq!(validator.check_count(&r), 2);

        let record = validator.validate(&r, &path);
        assert_eq!(record.reason, ReasonCode::BadSignature);
        assert!(record.detail.as_deref().unwrap_or_default().starts_with("magic:"));
    }

    #[test]
    fn test_checks_are_per_role() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"plain").unwrap();

        let validator =
            ArtifactValidator::new().with_check(role("glb-out"), ArtifactCheck::magic("glTF").compile());
        assert!(validator.validate(&role("other-out"), &path).passed_validation());
        assert!(!validator.validate(&role("glb-out"), &path).passed_validation());
    }

    #[test]
    fn test_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").unwrap();

        let record = ArtifactValidator::new().with_digest(true).validate(&role("a-out"), &path);
        assert_eq!(
            record.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }
}

//! Canonical artifact paths.
//!
//! Every role resolves to `{job_root}/{ordinal:02}_{owning_stage}/{file_name}`;
//! seed roles resolve under [`SEED_DIR`]. Resolution is pure: it never touches
//! the filesystem and never consults the process working directory.

use super::registry::{RoleOwner, StageContractRegistry};
use crate::core::{ArtifactRole, StageId};
use crate::errors::{JobError, ResolveError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Directory holding the job's seed artifacts.
pub const SEED_DIR: &str = "00_input";

/// Absolute working directory of one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct JobRoot(PathBuf);

impl JobRoot {
    /// Wraps an absolute path.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::RelativeRoot`] for relative paths.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, JobError> {
        let path = path.into();
        if path.is_absolute() {
            Ok(Self(path))
        } else {
            Err(JobError::RelativeRoot { path })
        }
    }

    /// Returns the root path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Directory holding seed artifacts.
    #[must_use]
    pub fn seed_dir(&self) -> PathBuf {
        self.0.join(SEED_DIR)
    }
}

impl TryFrom<PathBuf> for JobRoot {
    type Error = JobError;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobRoot> for PathBuf {
    fn from(root: JobRoot) -> Self {
        root.0
    }
}

impl AsRef<Path> for JobRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for JobRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Computes canonical paths for a registry.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactPathResolver<'a> {
    registry: &'a StageContractRegistry,
}

impl<'a> ArtifactPathResolver<'a> {
    /// Creates a resolver over a loaded registry.
    #[must_use]
    pub fn new(registry: &'a StageContractRegistry) -> Self {
        Self { registry }
    }

    /// Resolves the path of `role` as seen by `stage`.
    ///
    /// The stage must own or require the role. The result depends only on the
    /// job root and the role.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStage`] for an unregistered stage and
    /// [`ResolveError::UnknownRole`] when the stage has no contract for the role.
    pub fn resolve(
        &self,
        job_root: &JobRoot,
        stage: &StageId,
        role: &ArtifactRole,
    ) -> Result<PathBuf, ResolveError> {
        let definition = self
            .registry
            .definition(stage)
            .ok_or_else(|| ResolveError::UnknownStage {
                stage: stage.to_string(),
            })?;

        if !definition.produces(role) && !definition.inputs.contains(role) {
            return Err(ResolveError::UnknownRole {
                stage: stage.to_string(),
                role: role.to_string(),
            });
        }

        self.role_path(job_root, role)
            .ok_or_else(|| ResolveError::UnknownRole {
                stage: stage.to_string(),
                role: role.to_string(),
            })
    }

    /// Resolves any registered role by its owner, without a stage check.
    #[must_use]
    pub fn role_path(&self, job_root: &JobRoot, role: &ArtifactRole) -> Option<PathBuf> {
        let spec = self.registry.role(role.as_str())?;
        let dir = match self.registry.owner_of(role)? {
            RoleOwner::Seed => SEED_DIR.to_string(),
            RoleOwner::Stage(owner) => self.registry.definition(owner)?.dir_name(),
        };
        Some(job_root.as_path().join(dir).join(&spec.file_name))
    }

    /// Directory of a stage inside the job root.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownStage`] for an unregistered stage.
    pub fn stage_dir(&self, job_root: &JobRoot, stage: &StageId) -> Result<PathBuf, ResolveError> {
        self.registry
            .definition(stage)
            .map(|definition| job_root.as_path().join(definition.dir_name()))
            .ok_or_else(|| ResolveError::UnknownStage {
                stage: stage.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{role, sid, toy_registry};

    #[test]
    fn test_job_root_must_be_absolute() {
        assert!(JobRoot::new("/tmp/jobs/1").is_ok());
        assert!(matches!(
            JobRoot::new("jobs/1"),
            Err(JobError::RelativeRoot { .. })
        ));
    }

    #[test]
    fn test_resolve_layout() {
        let registry = toy_registry(&["a", "b", "c"]);
        let resolver = registry.resolver();
        let root = JobRoot::new("/jobs/j1").unwrap();

        assert_eq!(
            resolver.resolve(&root, &sid("a"), &role("a-out")).unwrap(),
            PathBuf::from("/jobs/j1/01_a/a-out.bin")
        );
        assert_eq!(
            resolver.resolve(&root, &sid("a"), &role("seed")).unwrap(),
            PathBuf::from("/jobs/j1/00_input/seed.bin")
        );
    }

    #[test]
    fn test_consumer_and_owner_agree() {
        let registry = toy_registry(&["a", "b"]);
        let resolver = registry.resolver();
        let root = JobRoot::new("/jobs/j1").unwrap();

        let from_owner = resolver.resolve(&root, &sid("a"), &role("a-out")).unwrap();
        let from_consumer = resolver.resolve(&root, &sid("b"), &role("a-out")).unwrap();
        assert_eq!(from_owner, from_consumer);
    }

    #[test]
    fn test_resolve_is_stable_across_reloads() {
        let root = JobRoot::new("/jobs/j1").unwrap();
        let first = toy_registry(&["a", "b", "c"]);
        let second = toy_registry(&["a", "b", "c"]);

        for name in ["a", "b", "c"] {
            let r = role(&format!("{name}-out"));
            let p1 = first.resolver().resolve(&root, &sid(name), &r).unwrap();
            let p2 = first.resolver().resolve(&root, &sid(name), &r).unwrap();
            let p3 = second.resolver().resolve(&root, &sid(name), &r).unwrap();
            assert_eq!(p1, p2);
            assert_eq!(p1, p3);
        }
    }

    #[test]
    fn test_resolve_unrelated_role_is_error() {
        let registry = toy_registry(&["a", "b", "c"]);
        let root = JobRoot::new("/jobs/j1").unwrap();
        let err = registry
            .resolver()
            .resolve(&root, &sid("a"), &role("c-out"))
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownRole {
                stage: "a".into(),
                role: "c-out".into()
            }
        );

        let err = registry
            .resolver()
            .resolve(&root, &sid("nope"), &role("a-out"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownStage { .. }));
    }

    #[test]
    fn test_stage_dir() {
        let registry = toy_registry(&["a", "b"]);
        let root = JobRoot::new("/jobs/j1").unwrap();
        assert_eq!(
            registry.resolver().stage_dir(&root, &sid("b")).unwrap(),
            PathBuf::from("/jobs/j1/02_b")
        );
        assert_eq!(root.seed_dir(), PathBuf::from("/jobs/j1/00_input"));
    }
}

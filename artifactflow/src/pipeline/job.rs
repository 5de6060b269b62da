//! Job identity and job roots.

use crate::contracts::{JobRoot, StageContractRegistry};
use crate::core::{ArtifactRole, StageId};
use crate::errors::{ArtifactflowError, JobError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

/// File in the job root holding [`JobMetadata`].
pub const JOB_METADATA_FILE: &str = "job.json";

#[allow(clippy::expect_used)] // constant pattern
fn job_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("job id pattern is valid")
    })
}

/// Stable identity of a job.
///
/// 1-128 characters of `[A-Za-z0-9._-]`, starting with an alphanumeric, so it
/// is always safe as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Creates a validated job id.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidId`] if the id is malformed.
    pub fn new(id: impl Into<String>) -> Result<Self, JobError> {
        let id = id.into();
        if job_id_pattern().is_match(&id) {
            Ok(Self(id))
        } else {
            Err(JobError::invalid_id(
                id,
                "use 1-128 chars of [A-Za-z0-9._-], starting with a letter or digit",
            ))
        }
    }

    /// Generates a fresh, time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = JobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Informational metadata persisted as `job.json`. Never used for decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// The job id.
    pub job_id: JobId,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Pipeline name at creation.
    pub pipeline: String,
    /// Where each seed artifact was copied from.
    #[serde(default)]
    pub sources: BTreeMap<ArtifactRole, PathBuf>,
}

/// One unit of work: an input asset moving through the pipeline.
///
/// A job owns its root exclusively. Roots are never reused by
/// [`Job::create`]; [`Job::open`] reattaches to an existing root to resume.
#[derive(Debug, Clone)]
pub struct Job {
    metadata: JobMetadata,
    root: JobRoot,
    cursor: Option<StageId>,
}

impl Job {
    /// Creates a job for a registry with exactly one seed role.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry does not have exactly one seed role,
    /// or for any failure of [`Job::create_with_inputs`].
    pub fn create(
        id: JobId,
        root: JobRoot,
        registry: &StageContractRegistry,
        input_asset: &Path,
    ) -> Result<Self, ArtifactflowError> {
        let seeds: Vec<_> = registry.seed_roles().map(|spec| spec.role.clone()).collect();
        let [seed] = seeds.as_slice() else {
            return Err(JobError::InputAsset {
                path: input_asset.to_path_buf(),
                reason: format!(
                    "pipeline '{}' declares {} seed roles; supply each one explicitly",
                    registry.name(),
                    seeds.len()
                ),
            }
            .into());
        };
        let inputs = BTreeMap::from([(seed.clone(), input_asset.to_path_buf())]);
        Self::create_with_inputs(id, root, registry, &inputs)
    }

    /// Creates a job, copying each seed artifact into its canonical path.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyExists`] if the root exists,
    /// [`JobError::InputAsset`] if a seed is missing, unknown or not a regular
    /// file, or an I/O error if the root cannot be populated. A partially
    /// populated root is removed again.
    pub fn create_with_inputs(
        id: JobId,
        root: JobRoot,
        registry: &StageContractRegistry,
        inputs: &BTreeMap<ArtifactRole, PathBuf>,
    ) -> Result<Self, ArtifactflowError> {
        for spec in registry.seed_roles() {
            let Some(source) = inputs.get(&spec.role) else {
                return Err(JobError::InputAsset {
                    path: root.seed_dir().join(&spec.file_name),
                    reason: format!("no input supplied for seed role '{}'", spec.role),
                }
                .into());
            };
            if !std::fs::metadata(source).is_ok_and(|m| m.is_file()) {
                return Err(JobError::InputAsset {
                    path: source.clone(),
                    reason: "not a readable regular file".to_string(),
                }
                .into());
            }
        }
        if let Some(extra) = inputs.keys().find(|r| registry.seed_roles().all(|s| &s.role != *r)) {
            return Err(JobError::InputAsset {
                path: inputs[extra].clone(),
                reason: format!("'{extra}' is not a seed role of pipeline '{}'", registry.name()),
            }
            .into());
        }

        let metadata = JobMetadata {
            job_id: id,
            created_at: Utc::now(),
            pipeline: registry.name().to_string(),
            sources: inputs.clone(),
        };

        Self::claim_root(&root)?;
        if let Err(e) = Self::populate(&root, registry, &metadata) {
            if let Err(cleanup) = std::fs::remove_dir_all(root.as_path()) {
                warn!(job_root = %root, error = %cleanup, "Failed to remove partially created job root");
            }
            return Err(e.into());
        }

        info!(job_id = %metadata.job_id, job_root = %root, "Created job");
        Ok(Self {
            metadata,
            root,
            cursor: None,
        })
    }

    /// Creates the root directory itself; whoever creates it owns the job.
    fn claim_root(root: &JobRoot) -> Result<(), ArtifactflowError> {
        if let Some(parent) = root.as_path().parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::create_dir(root.as_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(JobError::AlreadyExists {
                path: root.as_path().to_path_buf(),
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    fn populate(
        root: &JobRoot,
        registry: &StageContractRegistry,
        metadata: &JobMetadata,
    ) -> io::Result<()> {
        std::fs::create_dir(root.seed_dir())?;
        let resolver = registry.resolver();
        for (role, source) in &metadata.sources {
            let target = resolver
                .role_path(root, role)
                .ok_or_else(|| io::Error::other(format!("seed role '{role}' has no path")))?;
            std::fs::copy(source, &target)?;
        }
        write_json_atomic(&root.as_path().join(JOB_METADATA_FILE), metadata)
    }

    /// Reattaches to an existing job root.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if the root or its `job.json` is absent,
    /// or a serialization error if `job.json` is corrupt.
    pub fn open(root: JobRoot) -> Result<Self, ArtifactflowError> {
        let path = root.as_path().join(JOB_METADATA_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(JobError::NotFound {
                    path: root.as_path().to_path_buf(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: JobMetadata = serde_json::from_str(&text)?;
        Ok(Self {
            metadata,
            root,
            cursor: None,
        })
    }

    /// Deletes the job root and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root cannot be removed.
    pub fn cleanup(self) -> io::Result<()> {
        std::fs::remove_dir_all(self.root.as_path())?;
        info!(job_id = %self.metadata.job_id, job_root = %self.root, "Removed job root");
        Ok(())
    }

    /// The job id.
    #[must_use]
    pub fn id(&self) -> &JobId {
        &self.metadata.job_id
    }

    /// The job root.
    #[must_use]
    pub fn root(&self) -> &JobRoot {
        &self.root
    }

    /// When the job was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }

    /// The persisted metadata.
    #[must_use]
    pub fn metadata(&self) -> &JobMetadata {
        &self.metadata
    }

    /// The stage the driver is at, if a run has started.
    #[must_use]
    pub fn cursor(&self) -> Option<&StageId> {
        self.cursor.as_ref()
    }

    pub(crate) fn set_cursor(&mut self, stage: Option<StageId>) {
        self.cursor = stage;
    }
}

/// Writes JSON to a sibling temp file and renames it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

//! Job status derived from the artifacts on disk.
//!
//! The filesystem is the source of truth: a stage is complete exactly when
//! every declared output exists and validates. [`StatusRecord`] is an
//! informational cache for operators and is never read back for decisions.

use super::job::write_json_atomic;
use super::state::JobState;
use crate::classify::FailureReport;
use crate::contracts::{JobRoot, StageContractRegistry};
use crate::core::{ArtifactRecord, StageId};
use crate::errors::ResolveError;
use crate::validation::ArtifactValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// File in the job root holding the last [`StatusRecord`].
pub const STATUS_FILE: &str = "status.json";

/// Completeness of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    /// The stage.
    pub stage: StageId,
    /// True when every declared output validates.
    pub complete: bool,
    /// One record per declared output.
    pub artifacts: Vec<ArtifactRecord>,
}

/// Snapshot of a job root against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// The job root.
    pub job_root: PathBuf,
    /// Per-stage completeness in execution order.
    pub stages: Vec<StageStatus>,
    /// The first stage lacking valid artifacts, or `None` if all are valid.
    pub next_stage: Option<StageId>,
}

impl JobStatus {
    /// Validates every stage's declared outputs under `root`.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] only if the registry is internally
    /// inconsistent.
    pub fn scan(
        registry: &StageContractRegistry,
        validator: &ArtifactValidator,
        root: &JobRoot,
    ) -> Result<Self, ResolveError> {
        let resolver = registry.resolver();
        let mut stages = Vec::with_capacity(registry.len());
        for stage in registry.execution_order() {
            let artifacts = registry
                .produced_outputs_of(stage)?
                .iter()
                .map(|spec| {
                    resolver
                        .resolve(root, stage, &spec.role)
                        .map(|path| validator.validate(&spec.role, &path))
                })
                .collect::<Result<Vec<_>, _>>()?;
            stages.push(StageStatus {
                stage: stage.clone(),
                complete: artifacts.iter().all(ArtifactRecord::passed_validation),
                artifacts,
            });
        }
        let next_stage = stages.iter().find(|s| !s.complete).map(|s| s.stage.clone());
        Ok(Self {
            job_root: root.as_path().to_path_buf(),
            stages,
            next_stage,
        })
    }

    /// Returns true if every stage has valid artifacts.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next_stage.is_none()
    }

    /// Stages with valid artifacts, in execution order.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|s| s.complete)
            .map(|s| s.stage.clone())
            .collect()
    }

    /// Looks up one stage.
    #[must_use]
    pub fn stage(&self, stage: &StageId) -> Option<&StageStatus> {
        self.stages.iter().find(|s| &s.stage == stage)
    }
}

/// Informational summary written to `status.json` after each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// The job.
    pub job_id: String,
    /// The pipeline name.
    pub pipeline: String,
    /// When the record was written.
    pub updated_at: DateTime<Utc>,
    /// The final state of the run.
    pub state: JobState,
    /// Stages with valid artifacts after the run.
    pub completed_stages: Vec<StageId>,
    /// Non-critical stages that failed and were skipped.
    #[serde(default)]
    pub warnings: Vec<StageId>,
    /// The halting failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl StatusRecord {
    /// Writes the record to `{root}/status.json` via a temp file and rename.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be written.
    pub fn write(&self, root: &JobRoot) -> io::Result<()> {
        write_json_atomic(&Self::path(root.as_path()), self)
    }

    /// Reads the last record, if one was written.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read or parsed.
    pub fn read(root: &JobRoot) -> io::Result<Option<Self>> {
        match std::fs::read(Self::path(root.as_path())) {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn path(root: &Path) -> PathBuf {
        root.join(STATUS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{role, sid, toy_registry, write_file};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scan_reports_first_incomplete_stage() {
        let dir = tempfile::tempdir().unwrap();
        let root = JobRoot::new(dir.path()).unwrap();
        let registry = toy_registry(&["a", "b", "c"]);
        let validator = ArtifactValidator::from_registry(&registry);

        write_file(&dir.path().join("01_a/a-out.bin"), b"aaa");
        write_file(&dir.path().join("03_c/c-out.bin"), b"ccc");

        let status = JobStatus::scan(&registry, &validator, &root).unwrap();
        assert_eq!(status.next_stage, Some(sid("b")));
        assert_eq!(status.completed_stages(), vec![sid("a"), sid("c")]);
        assert!(!status.is_complete());
        assert_eq!(status.stage(&sid("b")).unwrap().artifacts[0].role, role("b-out"));
    }

    #[test]
    fn test_scan_empty_output_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let root = JobRoot::new(dir.path()).unwrap();
        let registry = toy_registry(&["a"]);
        write_file(&dir.path().join("01_a/a-out.bin"), b"");

        let status = JobStatus::scan(&registry, &ArtifactValidator::new(), &root).unwrap();
        assert_eq!(status.next_stage, Some(sid("a")));

        write_file(&dir.path().join("01_a/a-out.bin"), b"x");
        let status = JobStatus::scan(&registry, &ArtifactValidator::new(), &root).unwrap();
        assert!(status.is_complete());
    }

    #[test]
    fn test_status_record_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = JobRoot::new(dir.path()).unwrap();
        assert_eq!(StatusRecord::read(&root).unwrap(), None);

        let record = StatusRecord {
            job_id: "job-1".into(),
            pipeline: "toy".into(),
            updated_at: Utc::now(),
            state: JobState::Completed,
            completed_stages: vec![sid("a")],
            warnings: Vec::new(),
            failure: None,
        };
        record.write(&root).unwrap();

        assert_eq!(StatusRecord::read(&root).unwrap(), Some(record));
        assert!(!dir.path().join("status.json.tmp").exists());
    }
}

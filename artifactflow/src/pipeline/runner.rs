//! Running many jobs, each on its own root.

use super::driver::{JobReport, PipelineDriver};
use super::job::{Job, JobId};
use super::status::JobStatus;
use crate::cancellation::CancellationToken;
use crate::config::OrchestratorConfig;
use crate::contracts::JobRoot;
use crate::errors::{ArtifactflowError, ConfigurationError, JobError};
use crate::events::{EventSink, LoggingEventSink};
use crate::validation::ArtifactValidator;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Entry for a job that is currently running.
struct ActiveJob {
    job_id: JobId,
    cancel: Arc<CancellationToken>,
}

/// Releases a job root when its run ends, however it ends.
struct RootClaim<'a> {
    active: &'a DashMap<PathBuf, ActiveJob>,
    root: PathBuf,
}

impl Drop for RootClaim<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.root);
    }
}

/// Creates jobs under a common directory and runs them concurrently.
///
/// Each job gets its own sequential driver task; jobs share the registry
/// read-only. At most one run may own a given root at a time.
pub struct JobRunner {
    driver: Arc<PipelineDriver>,
    jobs_root: PathBuf,
    active: DashMap<PathBuf, ActiveJob>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("driver", &self.driver)
            .field("jobs_root", &self.jobs_root)
            .field("active", &self.active.len())
            .finish()
    }
}

impl JobRunner {
    /// Creates a runner placing job roots under `jobs_root`.
    #[must_use]
    pub fn new(driver: PipelineDriver, jobs_root: impl Into<PathBuf>) -> Self {
        Self {
            driver: Arc::new(driver),
            jobs_root: jobs_root.into(),
            active: DashMap::new(),
        }
    }

    /// Builds a runner with subprocess workers from the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid or the
    /// registry fails to load.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let registry = Arc::new(config.load_registry()?);
        let validator = ArtifactValidator::from_registry(&registry).with_digest(config.compute_digests);
        let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink::default());
        let driver = PipelineDriver::new(registry, Arc::new(config.supervisor()))
            .with_validator(validator)
            .with_event_sink(events)
            .with_status_record(config.write_status_record);
        info!(
            pipeline = driver.registry().name(),
            stages = driver.registry().len(),
            jobs_root = %config.jobs_root.display(),
            "Job runner ready"
        );
        Ok(Self::new(driver, config.jobs_root.clone()))
    }

    /// The shared driver.
    #[must_use]
    pub fn driver(&self) -> &PipelineDriver {
        &self.driver
    }

    /// The root a job with this id lives at.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::RelativeRoot`] if the jobs directory is relative.
    pub fn job_root(&self, id: &JobId) -> Result<JobRoot, JobError> {
        JobRoot::new(self.jobs_root.join(id.as_str()))
    }

    /// Creates a job with a fresh id from an input asset.
    ///
    /// # Errors
    ///
    /// See [`Job::create`].
    pub fn submit(&self, input_asset: &Path) -> Result<Job, ArtifactflowError> {
        self.submit_with_id(JobId::generate(), input_asset)
    }

    /// Creates a job with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// See [`Job::create`].
    pub fn submit_with_id(&self, id: JobId, input_asset: &Path) -> Result<Job, ArtifactflowError> {
        let root = self.job_root(&id)?;
        Job::create(id, root, self.driver.registry(), input_asset)
    }

    /// Runs a job to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::RootInUse`] if another run owns the job's root,
    /// or any orchestrator fault from [`PipelineDriver::run`].
    pub async fn run(&self, job: &mut Job) -> Result<JobReport, ArtifactflowError> {
        let cancel = Arc::new(CancellationToken::new());
        // Claims are keyed by the resolved directory, not its spelling.
        let root = tokio::fs::canonicalize(job.root().as_path())
            .await
            .unwrap_or_else(|_| job.root().as_path().to_path_buf());
        match self.active.entry(root.clone()) {
            Entry::Occupied(entry) => {
                return Err(JobError::RootInUse {
                    path: root,
                    owner: entry.get().job_id.to_string(),
                }
                .into());
            }
            Entry::Vacant(entry) => {
                entry.insert(ActiveJob {
                    job_id: job.id().clone(),
                    cancel: Arc::clone(&cancel),
                });
            }
        }
        let _claim = RootClaim {
            active: &self.active,
            root,
        };
        self.driver.run(job, &cancel).await
    }

    /// Reopens an existing job under the jobs directory and runs it again,
    /// resuming from the first stage lacking valid artifacts.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if the job root does not exist, or any
    /// error from [`JobRunner::run`].
    pub async fn resume(&self, id: &JobId) -> Result<JobReport, ArtifactflowError> {
        let mut job = Job::open(self.job_root(id)?)?;
        self.run(&mut job).await
    }

    /// Runs independent jobs concurrently.
    ///
    /// Results are returned in the order the jobs were given.
    pub async fn run_all(&self, jobs: Vec<Job>) -> Vec<Result<JobReport, ArtifactflowError>> {
        let runs = jobs.into_iter().map(|mut job| async move { self.run(&mut job).await });
        futures::future::join_all(runs).await
    }

    /// Requests cancellation of a running job.
    ///
    /// Returns false if no job with this id is running.
    pub fn cancel(&self, job_id: &JobId, reason: &str) -> bool {
        let token = self
            .active
            .iter()
            .find(|entry| &entry.value().job_id == job_id)
            .map(|entry| Arc::clone(&entry.value().cancel));
        match token {
            Some(token) => {
                info!(job_id = %job_id, reason, "Cancellation requested");
                token.cancel(reason);
                true
            }
            None => {
                warn!(job_id = %job_id, "Cancellation requested for a job that is not running");
                false
            }
        }
    }

    /// Ids of jobs currently running.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.active.iter().map(|e| e.value().job_id.clone()).collect();
        ids.sort();
        ids
    }

    /// Scans a job's root against the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the job root is invalid or the registry is
    /// internally inconsistent.
    pub fn status(&self, id: &JobId) -> Result<JobStatus, ArtifactflowError> {
        let root = self.job_root(id)?;
        if !root.as_path().is_dir() {
            return Err(JobError::NotFound {
                path: root.as_path().to_path_buf(),
            }
            .into());
        }
        Ok(JobStatus::scan(self.driver.registry(), self.driver.validator(), &root)?)
    }
}

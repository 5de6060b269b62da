//! The sequential per-job driver.

use super::job::Job;
use super::state::{JobState, StateMachine};
use super::status::StatusRecord;
use crate::cancellation::CancellationToken;
use crate::classify::{Classifier, Disposition, FailureReport, HaltReport};
use crate::contracts::{StageContractRegistry, StageDefinition};
use crate::core::{ArtifactRecord, ArtifactRole, PipelineEvent, ProcessExit, ReasonCode, StageId, StageOutcome};
use crate::errors::{ArtifactflowError, ResolveError};
use crate::events::{EventSink, NoOpEventSink};
use crate::observability::{JobSpanAttributes, StageSpanAttributes};
use crate::supervisor::{Invocation, ProcessSupervisor};
use crate::validation::ArtifactValidator;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Everything that happened in one run of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// The job.
    pub job_id: String,
    /// The job root.
    pub job_root: PathBuf,
    /// The terminal state.
    pub final_state: JobState,
    /// One outcome per stage reached, in execution order.
    pub outcomes: Vec<StageOutcome>,
    /// Tolerated failures of non-critical stages.
    pub warnings: Vec<FailureReport>,
    /// Present when the job halted.
    pub halt: Option<HaltReport>,
    /// Every state the job passed through.
    pub history: Vec<JobState>,
}

impl JobReport {
    /// Returns true if the job completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.final_state, JobState::Completed)
    }

    /// Returns true if the job halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        matches!(self.final_state, JobState::Halted { .. })
    }

    /// Returns true if the job was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.final_state, JobState::Cancelled { .. })
    }

    /// Stages whose worker was invoked in this run.
    #[must_use]
    pub fn stages_run(&self) -> Vec<StageId> {
        self.outcomes
            .iter()
            .filter(|o| o.exit.is_some())
            .map(|o| o.stage.clone())
            .collect()
    }

    /// Stages resumed from existing artifacts.
    #[must_use]
    pub fn stages_skipped(&self) -> Vec<StageId> {
        self.outcomes
            .iter()
            .filter(|o| o.skipped)
            .map(|o| o.stage.clone())
            .collect()
    }

    /// The outcome for one stage, if it was reached.
    #[must_use]
    pub fn outcome(&self, stage: &StageId) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| &o.stage == stage)
    }
}

enum Flow {
    Continue,
    Stop,
}

struct RunState<'j> {
    job: &'j mut Job,
    job_id: String,
    machine: StateMachine,
    outcomes: Vec<StageOutcome>,
    warnings: Vec<FailureReport>,
    halt: Option<HaltReport>,
    completed: Vec<StageId>,
    resuming: bool,
}

/// Drives one job through the registry's stages, one at a time.
///
/// A driver holds no per-job state and can run any number of jobs, one
/// [`PipelineDriver::run`] call each. Pipeline failures end the run with a
/// terminal [`JobState`] inside an `Ok` report; `Err` means the orchestrator
/// itself could not proceed.
pub struct PipelineDriver {
    registry: Arc<StageContractRegistry>,
    supervisor: Arc<dyn ProcessSupervisor>,
    validator: Arc<ArtifactValidator>,
    events: Arc<dyn EventSink>,
    write_status: bool,
}

impl std::fmt::Debug for PipelineDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDriver")
            .field("pipeline", &self.registry.name())
            .field("stages", &self.registry.len())
            .field("write_status", &self.write_status)
            .finish_non_exhaustive()
    }
}

impl PipelineDriver {
    /// Creates a driver validating with the registry's declared checks.
    #[must_use]
    pub fn new(registry: Arc<StageContractRegistry>, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        let validator = Arc::new(ArtifactValidator::from_registry(&registry));
        Self {
            registry,
            supervisor,
            validator,
            events: Arc::new(NoOpEventSink),
            write_status: true,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Replaces the artifact validator.
    #[must_use]
    pub fn with_validator(mut self, validator: ArtifactValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Enables or disables writing `status.json` after each run.
    #[must_use]
    pub fn with_status_record(mut self, enabled: bool) -> Self {
        self.write_status = enabled;
        self
    }

    /// The registry this driver runs.
    #[must_use]
    pub fn registry(&self) -> &Arc<StageContractRegistry> {
        &self.registry
    }

    /// The validator this driver checks artifacts with.
    #[must_use]
    pub fn validator(&self) -> &ArtifactValidator {
        &self.validator
    }

    /// Runs the job from the first stage lacking valid artifacts to a
    /// terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error only for orchestrator faults, such as a stage
    /// directory that cannot be created.
    pub async fn run(
        &self,
        job: &mut Job,
        cancel: &CancellationToken,
    ) -> Result<JobReport, ArtifactflowError> {
        let span = JobSpanAttributes::new(
            self.registry.name(),
            job.id().as_str(),
            job.root().to_string(),
        )
        .span();
        self.run_job(job, cancel).instrument(span).await
    }

    async fn run_job(
        &self,
        job: &mut Job,
        cancel: &CancellationToken,
    ) -> Result<JobReport, ArtifactflowError> {
        let order = self.registry.execution_order();
        let Some(first) = order.first() else {
            return Err(ResolveError::UnknownStage {
                stage: "<none>".to_string(),
            }
            .into());
        };

        let job_id = job.id().to_string();
        let job_root = job.root().as_path().to_path_buf();
        info!(job_id = %job_id, stages = order.len(), "Job started");
        self.events
            .emit(&PipelineEvent::job_started(&job_id, &job_root.display().to_string()))
            .await;

        let mut run = RunState {
            job,
            job_id,
            machine: StateMachine::new(first.clone()),
            outcomes: Vec::with_capacity(order.len()),
            warnings: Vec::new(),
            halt: None,
            completed: Vec::new(),
            resuming: true,
        };

        let mut stopped = false;
        for (index, stage) in order.iter().enumerate() {
            if index > 0 {
                run.machine.transition(JobState::Pending { stage: stage.clone() })?;
            }
            run.job.set_cursor(Some(stage.clone()));
            let definition = self
                .registry
                .definition(stage)
                .ok_or_else(|| ResolveError::UnknownStage {
                    stage: stage.to_string(),
                })?;
            let span = StageSpanAttributes::new(stage.as_str(), definition.ordinal, definition.critical).span();
            if let Flow::Stop = self.step(&mut run, definition, cancel).instrument(span).await? {
                stopped = true;
                break;
            }
        }

        if !stopped {
            run.machine.transition(JobState::Completed)?;
            run.job.set_cursor(None);
            let skipped = run.outcomes.iter().filter(|o| o.skipped).count();
            let ran = run.outcomes.len() - skipped;
            info!(
                job_id = %run.job_id,
                stages_run = ran,
                stages_skipped = skipped,
                warnings = run.warnings.len(),
                "Job completed"
            );
            self.events
                .emit(&PipelineEvent::job_completed(&run.job_id, ran, skipped))
                .await;
        }

        let RunState {
            job,
            job_id,
            machine,
            outcomes,
            warnings,
            halt,
            completed,
            ..
        } = run;
        let (final_state, history) = machine.into_parts();

        if self.write_status {
            let record = StatusRecord {
                job_id: job_id.clone(),
                pipeline: self.registry.name().to_string(),
                updated_at: Utc::now(),
                state: final_state.clone(),
                completed_stages: completed,
                warnings: warnings.iter().map(|w| w.stage.clone()).collect(),
                failure: halt.as_ref().map(|h| h.failure.clone()),
            };
            if let Err(e) = record.write(job.root()) {
                warn!(job_id = %job_id, error = %e, "Failed to write status record");
            }
        }

        Ok(JobReport {
            job_id,
            job_root,
            final_state,
            outcomes,
            warnings,
            halt,
            history,
        })
    }

    async fn step(
        &self,
        run: &mut RunState<'_>,
        definition: &StageDefinition,
        cancel: &CancellationToken,
    ) -> Result<Flow, ArtifactflowError> {
        let stage = &definition.id;
        let started_at = Utc::now();

        if cancel.is_cancelled() {
            let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
            self.cancelled(run, stage, &reason).await?;
            return Ok(Flow::Stop);
        }

        let resolver = self.registry.resolver();
        let root = run.job.root().clone();
        let outputs: Vec<(ArtifactRole, PathBuf)> = definition
            .outputs
            .iter()
            .map(|spec| Ok((spec.role.clone(), resolver.resolve(&root, stage, &spec.role)?)))
            .collect::<Result<_, ResolveError>>()?;

        if run.resuming {
            let records = self.validate_all(outputs.clone()).await;
            if records.iter().all(ArtifactRecord::passed_validation) {
                run.machine.transition(JobState::StageSucceeded { stage: stage.clone() })?;
                info!(job_id = %run.job_id, stage = %stage, "Valid artifacts present; skipping stage");
                self.events
                    .emit(&PipelineEvent::stage_skipped(&run.job_id, stage.as_str()))
                    .await;
                run.completed.push(stage.clone());
                run.outcomes.push(StageOutcome::skipped(stage.clone(), records));
                return Ok(Flow::Continue);
            }
            run.resuming = false;
        }

        let inputs: Vec<(ArtifactRole, PathBuf)> = definition
            .inputs
            .iter()
            .map(|role| Ok((role.clone(), resolver.resolve(&root, stage, role)?)))
            .collect::<Result<_, ResolveError>>()?;
        let input_records = self.validate_all(inputs).await;
        if let Some(record) = input_records.iter().find(|r| Classifier::classify_input(r).is_some()) {
            let report = FailureReport::missing_input(&run.job_id, stage, definition.critical, record);
            let outcome = failed_outcome(stage, started_at, None, &report, input_records.clone());
            return self.fail(run, outcome, report).await;
        }

        let invocation = match Invocation::prepare(&self.registry, stage, &run.job_id, &root) {
            Ok(invocation) => invocation,
            Err(e) => {
                let report = FailureReport::configuration(&run.job_id, stage, e.to_string());
                let outcome = failed_outcome(stage, started_at, None, &report, input_records);
                return self.fail(run, outcome, report).await;
            }
        };

        clear_stale_outputs(&outputs)?;
        std::fs::create_dir_all(&invocation.working_dir)?;

        run.machine.transition(JobState::Running { stage: stage.clone() })?;
        info!(job_id = %run.job_id, stage = %stage, "Stage started");
        self.events
            .emit(&PipelineEvent::stage_started(&run.job_id, stage.as_str()))
            .await;

        let process = self.supervisor.run(&invocation, cancel).await;

        if let ProcessExit::Cancelled { reason } = &process.exit {
            run.outcomes.push(StageOutcome {
                stage: stage.clone(),
                started_at,
                ended_at: process.ended_at,
                exit: Some(process.exit.clone()),
                category: None,
                artifacts: Vec::new(),
                skipped: false,
                output: process.output.clone(),
            });
            self.cancelled(run, stage, reason).await?;
            return Ok(Flow::Stop);
        }

        if let Some(category) = Classifier::classify_exit(&process.exit) {
            let report = FailureReport::process(
                &run.job_id,
                stage,
                definition.critical,
                category,
                &process.exit,
                process.output.clone(),
            );
            let mut outcome = failed_outcome(stage, started_at, Some(process.exit.clone()), &report, Vec::new());
            outcome.output = process.output;
            return self.fail(run, outcome, report).await;
        }

        let records = self.validate_all(outputs).await;
        let violation = records
            .iter()
            .find_map(|r| Classifier::classify_output(r).map(|category| (r, category)));
        if let Some((record, category)) = violation {
            let report = FailureReport::output(
                &run.job_id,
                stage,
                definition.critical,
                category,
                record,
                &process.exit,
                process.output.clone(),
            );
            let mut outcome =
                failed_outcome(stage, started_at, Some(process.exit.clone()), &report, records.clone());
            outcome.output = process.output;
            return self.fail(run, outcome, report).await;
        }

        run.machine.transition(JobState::StageSucceeded { stage: stage.clone() })?;
        let duration_ms = process.duration_ms();
        info!(
            job_id = %run.job_id,
            stage = %stage,
            duration_ms,
            outputs = records.len(),
            "Stage succeeded"
        );
        self.events
            .emit(&PipelineEvent::stage_succeeded(&run.job_id, stage.as_str(), duration_ms))
            .await;
        run.completed.push(stage.clone());
        run.outcomes.push(StageOutcome {
            stage: stage.clone(),
            started_at,
            ended_at: process.ended_at,
            exit: Some(process.exit),
            category: None,
            artifacts: records,
            skipped: false,
            output: process.output,
        });
        Ok(Flow::Continue)
    }

    async fn fail(
        &self,
        run: &mut RunState<'_>,
        outcome: StageOutcome,
        report: FailureReport,
    ) -> Result<Flow, ArtifactflowError> {
        let stage = report.stage.clone();
        let category = report.category;
        run.machine.transition(JobState::StageFailed {
            stage: stage.clone(),
            category,
        })?;
        warn!(
            job_id = %run.job_id,
            stage = %stage,
            category = %category,
            role = ?report.role,
            "Stage failed: {}",
            report.diagnostic
        );
        self.events
            .emit(&PipelineEvent::stage_failed(
                &run.job_id,
                stage.as_str(),
                category.name(),
                &report.diagnostic,
            ))
            .await;
        run.outcomes.push(outcome);

        match report.disposition {
            Disposition::Halt => {
                run.machine.transition(JobState::Halted {
                    stage: stage.clone(),
                    category,
                })?;
                warn!(
                    job_id = %run.job_id,
                    stage = %stage,
                    category = %category,
                    hint = category.operator_hint(),
                    "Job halted"
                );
                self.events
                    .emit(&PipelineEvent::job_halted(&run.job_id, stage.as_str(), category.name()))
                    .await;
                run.halt = Some(HaltReport::new(
                    run.job.root().as_path().to_path_buf(),
                    run.completed.clone(),
                    report,
                ));
                Ok(Flow::Stop)
            }
            Disposition::SkipWithWarning => {
                warn!(
                    job_id = %run.job_id,
                    stage = %stage,
                    category = %category,
                    "Non-critical stage failed; continuing"
                );
                self.events
                    .emit(&PipelineEvent::stage_warning(&run.job_id, stage.as_str(), category.name()))
                    .await;
                run.warnings.push(report);
                Ok(Flow::Continue)
            }
        }
    }

    async fn cancelled(
        &self,
        run: &mut RunState<'_>,
        stage: &StageId,
        reason: &str,
    ) -> Result<(), ArtifactflowError> {
        run.machine.transition(JobState::Cancelled { stage: stage.clone() })?;
        warn!(job_id = %run.job_id, stage = %stage, reason, "Job cancelled");
        self.events
            .emit(&PipelineEvent::job_cancelled(&run.job_id, stage.as_str(), reason))
            .await;
        Ok(())
    }

    /// Validates artifacts off the async runtime.
    async fn validate_all(&self, targets: Vec<(ArtifactRole, PathBuf)>) -> Vec<ArtifactRecord> {
        if targets.is_empty() {
            return Vec::new();
        }
        let validator = Arc::clone(&self.validator);
        let fallback = targets.clone();
        let task = tokio::task::spawn_blocking(move || {
            targets
                .iter()
                .map(|(role, path)| validator.validate(role, path))
                .collect::<Vec<_>>()
        });
        match task.await {
            Ok(records) => records,
            Err(e) => fallback
                .into_iter()
                .map(|(role, path)| {
                    ArtifactRecord::failed(role, path, 0, ReasonCode::Unreadable, format!("validation task failed: {e}"))
                })
                .collect(),
        }
    }
}

fn failed_outcome(
    stage: &StageId,
    started_at: chrono::DateTime<Utc>,
    exit: Option<ProcessExit>,
    report: &FailureReport,
    artifacts: Vec<ArtifactRecord>,
) -> StageOutcome {
    StageOutcome {
        stage: stage.clone(),
        started_at,
        ended_at: Utc::now(),
        exit,
        category: Some(report.category),
        artifacts,
        skipped: false,
        output: crate::core::CapturedOutput::default(),
    }
}

/// Removes outputs left by an earlier attempt so a worker that writes
/// nothing cannot pass on stale files.
fn clear_stale_outputs(outputs: &[(ArtifactRole, PathBuf)]) -> io::Result<()> {
    for (role, path) in outputs {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(role = %role, path = %path.display(), "Removed stale output"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

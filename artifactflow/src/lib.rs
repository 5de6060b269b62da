//! # Artifactflow
//!
//! Artifact-contract orchestration for file-based, multi-stage processing
//! pipelines whose stages are opaque external programs.
//!
//! Artifactflow provides:
//!
//! - **A checked stage registry**: stages, their predecessors and the artifact
//!   roles they consume and produce, verified once at load
//! - **Canonical paths**: every role resolves to
//!   `{job_root}/{ordinal}_{stage}/{file_name}`, with no searching
//! - **Artifact validation**: existence, size and format checks (magic bytes,
//!   `.npz` fields, JSON keys) before anything downstream runs
//! - **Process supervision**: timeouts, bounded output capture and
//!   process-group termination for every worker
//! - **Failure classification**: one category per failure, halt or warn, and
//!   resume from the first stage lacking valid artifacts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use artifactflow::prelude::*;
//!
//! let config = OrchestratorConfig::from_file(Path::new("artifactflow.json"))?.apply_env()?;
//! init_tracing(&config.log);
//!
//! let runner = JobRunner::from_config(&config)?;
//! let mut job = runner.submit(Path::new("/incoming/character.glb"))?;
//! let report = runner.run(&mut job).await?;
//!
//! if let Some(halt) = &report.halt {
//!     eprintln!("{}", halt.to_json()?);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod classify;
pub mod config;
pub mod contracts;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod supervisor;
pub mod testing;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::classify::{
        Classifier, Disposition, FailureCategory, FailureReport, HaltReport, OutputViolation,
    };
    pub use crate::config::{LogConfig, LogFormat, OrchestratorConfig};
    pub use crate::contracts::{
        ArtifactPathResolver, JobRoot, RegistryDefinition, RoleSpec, StageContractRegistry,
        StageDefinition,
    };
    pub use crate::core::{
        ArtifactRecord, ArtifactRole, PipelineEvent, ProcessExit, ReasonCode, StageId,
        StageOutcome,
    };
    pub use crate::errors::{
        ArtifactflowError, ConfigurationError, ContractErrorInfo, JobError, ResolveError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        Job, JobId, JobReport, JobRunner, JobState, JobStatus, PipelineDriver,
    };
    pub use crate::supervisor::{
        CommandTemplate, Invocation, ProcessSupervisor, SubprocessSupervisor,
    };
    pub use crate::validation::{ArtifactCheck, ArtifactValidator, StructuralCheck};
}

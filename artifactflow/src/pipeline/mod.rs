//! Job lifecycle and the pipeline state machine.
//!
//! This module provides:
//! - [`Job`] creation and reattachment on an absolute job root
//! - The [`JobState`] machine with its legal transitions
//! - [`PipelineDriver`], which runs one job stage by stage
//! - [`JobStatus`], derived from the artifacts on disk
//! - [`JobRunner`], which runs independent jobs concurrently

mod driver;
mod job;
mod runner;
mod state;
mod status;


pub use driver::{JobReport, PipelineDriver};
pub use job::{Job, JobId, JobMetadata, JOB_METADATA_FILE};
pub use runner::JobRunner;
pub use state::{InvalidTransition, JobState, StateMachine};
pub use status::{JobStatus, StageStatus, StatusRecord, STATUS_FILE};

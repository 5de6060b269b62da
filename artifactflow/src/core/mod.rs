//! Core domain model types for artifactflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage ids and artifact roles
//! - Artifact records and validation reason codes
//! - Process exits and stage outcomes
//! - Pipeline lifecycle events

mod artifact;
mod event;
mod ids;
mod outcome;

pub use artifact::{ArtifactRecord, ReasonCode};
pub use event::PipelineEvent;
pub use ids::{ArtifactRole, StageId};
pub use outcome::{CapturedOutput, ProcessExit, ProcessOutcome, StageOutcome};

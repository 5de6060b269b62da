//! Failure classification.
//!
//! Every stage failure lands in exactly one [`FailureCategory`]. The
//! classifier never retries and never picks an alternate path; it only
//! decides the category, whether the job halts, and what the operator is
//! told.

mod category;
mod classifier;
mod report;

pub use category::{FailureCategory, OutputViolation};
pub use classifier::{Classifier, Disposition};
pub use report::{FailureReport, HaltReport};

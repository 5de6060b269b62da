//! Logging setup and span attributes.

mod tracing;

pub use self::tracing::{init_tracing, JobSpanAttributes, StageSpanAttributes};

//! Process supervision for stage workers.
//!
//! [`Invocation::prepare`] turns a stage's [`CommandTemplate`] into a concrete
//! command with absolute artifact paths; a [`ProcessSupervisor`] runs it.

mod command;
mod output;
mod process;

pub use command::{
    CommandTemplate, Invocation, Placeholder, ENV_INPUT_PREFIX, ENV_JOB_ID, ENV_OUTPUT_PREFIX,
    ENV_STAGE,
};
pub use output::BoundedOutput;
#[cfg(test)]
pub use process::MockProcessSupervisor;
pub use process::{
    ProcessSupervisor, SubprocessSupervisor, DEFAULT_OUTPUT_LIMIT, DEFAULT_READER_GRACE,
};

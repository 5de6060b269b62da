//! Cooperative cancellation for running jobs.

mod token;

pub use token::CancellationToken;

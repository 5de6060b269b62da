//! Tracing subscriber setup and structured span attributes.

use crate::config::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over [`LogConfig::filter`]. Returns false if a
/// global subscriber was already installed, which leaves that one in place.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match config.format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    }
}

/// Attributes recorded on a job span.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpanAttributes {
    /// Pipeline (registry) name.
    pub pipeline: String,
    /// Job id.
    pub job_id: String,
    /// Job root.
    pub job_root: String,
}

impl JobSpanAttributes {
    /// Creates job span attributes.
    #[must_use]
    pub fn new(
        pipeline: impl Into<String>,
        job_id: impl Into<String>,
        job_root: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            job_id: job_id.into(),
            job_root: job_root.into(),
        }
    }

    /// Opens the `job` span.
    #[must_use]
    pub fn span(&self) -> Span {
        info_span!(
            "job",
            pipeline = %self.pipeline,
            job_id = %self.job_id,
            job_root = %self.job_root,
        )
    }

    /// Flat key/value form for exporters.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        HashMap::from([
            ("pipeline.name".to_string(), self.pipeline.clone()),
            ("job.id".to_string(), self.job_id.clone()),
            ("job.root".to_string(), self.job_root.clone()),
        ])
    }
}

/// Attributes recorded on a stage span.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSpanAttributes {
    /// Stage id.
    pub stage: String,
    /// Layout ordinal.
    pub ordinal: u8,
    /// Whether a failure halts the job.
    pub critical: bool,
    /// Final status, once known.
    pub status: Option<String>,
}

impl StageSpanAttributes {
    /// Creates stage span attributes.
    #[must_use]
    pub fn new(stage: impl Into<String>, ordinal: u8, critical: bool) -> Self {
        Self {
            stage: stage.into(),
            ordinal,
            critical,
            status: None,
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Opens the `stage` span.
    #[must_use]
    pub fn span(&self) -> Span {
        info_span!(
            "stage",
            stage = %self.stage,
            ordinal = self.ordinal,
            critical = self.critical,
        )
    }

    /// Flat key/value form for exporters.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::from([
            ("stage.name".to_string(), self.stage.clone()),
            ("stage.ordinal".to_string(), self.ordinal.to_string()),
            ("stage.critical".to_string(), self.critical.to_string()),
        ]);
        if let Some(ref status) = self.status {
            attrs.insert("stage.status".to_string(), status.clone());
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_attributes() {
        let attrs = JobSpanAttributes::new("rigging", "job-7", "/jobs/job-7").to_attributes();
        assert_eq!(attrs.get("job.id"), Some(&"job-7".to_string()));
        assert_eq!(attrs.get("pipeline.name"), Some(&"rigging".to_string()));
    }

    #[test]
    fn test_stage_attributes() {
        let attrs = StageSpanAttributes::new("structure_merge", 4, true)
            .with_status("succeeded")
            .to_attributes();
        assert_eq!(attrs.get("stage.ordinal"), Some(&"4".to_string()));
        assert_eq!(attrs.get("stage.status"), Some(&"succeeded".to_string()));
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = LogConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}

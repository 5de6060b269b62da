//! Pipeline lifecycle events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An event emitted while a job is driven through its stages.
///
/// Events are consumed by event sinks for logging, monitoring, or tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event type (e.g., "stage.started", "job.halted").
    #[serde(rename = "type")]
    pub event_type: String,

    /// When the event occurred (RFC 3339).
    pub timestamp: String,

    /// The event payload data.
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl PipelineEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            data: HashMap::new(),
        }
    }

    /// Adds a data field to the event.
    #[must_use]
    pub fn add_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Returns the payload as a JSON object.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> =
            self.data.clone().into_iter().collect();
        serde_json::Value::Object(map)
    }

    /// Creates a "job.started" event.
    #[must_use]
    pub fn job_started(job_id: &str, job_root: &str) -> Self {
        Self::new("job.started")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("job_root", serde_json::json!(job_root))
    }

    /// Creates a "stage.skipped" event for a stage resumed from artifacts.
    #[must_use]
    pub fn stage_skipped(job_id: &str, stage: &str) -> Self {
        Self::new("stage.skipped")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("reason", serde_json::json!("valid artifacts present"))
    }

    /// Creates a "stage.started" event.
    #[must_use]
    pub fn stage_started(job_id: &str, stage: &str) -> Self {
        Self::new("stage.started")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stage", serde_json::json!(stage))
    }

    /// Creates a "stage.succeeded" event.
    #[must_use]
    pub fn stage_succeeded(job_id: &str, stage: &str, duration_ms: i64) -> Self {
        Self::new("stage.succeeded")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("duration_ms", serde_json::json!(duration_ms))
    }

    /// Creates a "stage.failed" event.
    #[must_use]
    pub fn stage_failed(job_id: &str, stage: &str, category: &str, diagnostic: &str) -> Self {
        Self::new("stage.failed")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("category", serde_json::json!(category))
            .add_data("diagnostic", serde_json::json!(diagnostic))
    }

    /// Creates a "stage.warning" event for a tolerated non-critical failure.
    #[must_use]
    pub fn stage_warning(job_id: &str, stage: &str, category: &str) -> Self {
        Self::new("stage.warning")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("category", serde_json::json!(category))
    }

    /// Creates a "job.completed" event.
    #[must_use]
    pub fn job_completed(job_id: &str, stages_run: usize, stages_skipped: usize) -> Self {
        Self::new("job.completed")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stages_run", serde_json::json!(stages_run))
            .add_data("stages_skipped", serde_json::json!(stages_skipped))
    }

    /// Creates a "job.halted" event.
    #[must_use]
    pub fn job_halted(job_id: &str, stage: &str, category: &str) -> Self {
        Self::new("job.halted")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("category", serde_json::json!(category))
    }

    /// Creates a "job.cancelled" event.
    #[must_use]
    pub fn job_cancelled(job_id: &str, stage: &str, reason: &str) -> Self {
        Self::new("job.cancelled")
            .add_data("job_id", serde_json::json!(job_id))
            .add_data("stage", serde_json::json!(stage))
            .add_data("reason", serde_json::json!(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = PipelineEvent::new("custom.event");
        assert_eq!(event.event_type, "custom.event");
        assert!(event.timestamp.contains('T'));
        assert!(event.data.is_empty());
    }

    #[test]
    fn test_stage_failed_event() {
        let event = PipelineEvent::stage_failed("job-1", "merge", "ProcessTimeout", "timed out");
        assert_eq!(event.event_type, "stage.failed");
        assert_eq!(event.data.get("category"), Some(&serde_json::json!("ProcessTimeout")));
    }

    #[test]
    fn test_event_serialization() {
        let event = PipelineEvent::job_halted("job-1", "b", "OutputMalformed");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job.halted");
        assert_eq!(json["data"]["stage"], "b");
    }
}

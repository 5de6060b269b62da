//! Orchestrator configuration.
//!
//! Configuration is read once at startup from an optional JSON file and then
//! overlaid with `ARTIFACTFLOW_*` environment variables. Any invalid value is
//! a [`ConfigurationError`]; nothing is re-read while jobs run.

use crate::contracts::StageContractRegistry;
use crate::errors::{codes, ConfigurationError, ContractErrorInfo};
use crate::supervisor::{SubprocessSupervisor, DEFAULT_OUTPUT_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`OrchestratorConfig::jobs_root`].
pub const ENV_JOBS_ROOT: &str = "ARTIFACTFLOW_JOBS_ROOT";
/// Environment variable overriding [`OrchestratorConfig::registry_path`].
pub const ENV_REGISTRY: &str = "ARTIFACTFLOW_REGISTRY";
/// Environment variable overriding [`LogConfig::format`].
pub const ENV_LOG_FORMAT: &str = "ARTIFACTFLOW_LOG_FORMAT";
/// Environment variable overriding [`OrchestratorConfig::output_limit_bytes`].
pub const ENV_OUTPUT_LIMIT: &str = "ARTIFACTFLOW_OUTPUT_LIMIT";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Directory under which job roots are created (`{jobs_root}/{job_id}`).
    #[serde(default = "default_jobs_root")]
    pub jobs_root: PathBuf,
    /// JSON registry definition; the built-in rigging pipeline when absent.
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    /// Bound on captured worker output, in bytes.
    #[serde(default = "default_output_limit")]
    pub output_limit_bytes: usize,
    /// How long output readers may drain after a worker ends, in milliseconds.
    #[serde(default = "default_reader_grace_ms")]
    pub reader_grace_ms: u64,
    /// Whether `status.json` is written after each run.
    #[serde(default = "default_write_status_record")]
    pub write_status_record: bool,
    /// Whether status records carry SHA-256 digests of valid artifacts.
    #[serde(default)]
    pub compute_digests: bool,
    /// Logging.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_jobs_root() -> PathBuf {
    PathBuf::from("/var/lib/artifactflow/jobs")
}

fn default_output_limit() -> usize {
    DEFAULT_OUTPUT_LIMIT
}

fn default_reader_grace_ms() -> u64 {
    2000
}

fn default_write_status_record() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            jobs_root: default_jobs_root(),
            registry_path: None,
            output_limit_bytes: default_output_limit(),
            reader_grace_ms: default_reader_grace_ms(),
            write_status_record: default_write_status_record(),
            compute_digests: false,
            log: LogConfig::default(),
        }
    }
}

fn value_error(key: &str, message: String) -> ConfigurationError {
    ConfigurationError::new(message).with_error_info(
        ContractErrorInfo::new(codes::CONFIG_VALUE, "Invalid configuration value")
            .with_context_entry("key", key),
    )
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the jobs root.
    #[must_use]
    pub fn with_jobs_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.jobs_root = path.into();
        self
    }

    /// Sets the registry definition path.
    #[must_use]
    pub fn with_registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    /// Sets the captured output bound.
    #[must_use]
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    /// Enables or disables the status cache.
    #[must_use]
    pub fn with_status_record(mut self, enabled: bool) -> Self {
        self.write_status_record = enabled;
        self
    }

    /// Sets the log configuration.
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Reader drain grace period.
    #[must_use]
    pub fn reader_grace(&self) -> Duration {
        Duration::from_millis(self.reader_grace_ms)
    }

    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document does not parse.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| {
            ConfigurationError::new(format!("Configuration does not parse: {e}"))
                .with_error_info(ContractErrorInfo::new(codes::CONFIG_LOAD, "Unreadable configuration"))
        })
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::new(format!("Cannot read configuration {}: {e}", path.display()))
                .with_error_info(
                    ContractErrorInfo::new(codes::CONFIG_LOAD, "Unreadable configuration")
                        .with_context_entry("path", path.display().to_string()),
                )
        })?;
        Self::from_json(&text)
    }

    /// Overlays `ARTIFACTFLOW_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a variable holds an invalid value.
    pub fn apply_env(self) -> Result<Self, ConfigurationError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlays variables from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a variable holds an invalid value.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_JOBS_ROOT) {
            self.jobs_root = PathBuf::from(root);
        }
        if let Some(path) = lookup(ENV_REGISTRY) {
            self.registry_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = format
                .parse()
                .map_err(|e: String| value_error(ENV_LOG_FORMAT, e))?;
        }
        if let Some(limit) = lookup(ENV_OUTPUT_LIMIT) {
            self.output_limit_bytes = limit.trim().parse().map_err(|_| {
                value_error(
                    ENV_OUTPUT_LIMIT,
                    format!("{ENV_OUTPUT_LIMIT} must be a byte count, got '{limit}'"),
                )
            })?;
        }
        Ok(self)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a relative jobs root or a zero output
    /// bound.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.jobs_root.is_absolute() {
            return Err(value_error(
                "jobs_root",
                format!("jobs_root must be absolute, got {}", self.jobs_root.display()),
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(value_error(
                "output_limit_bytes",
                "output_limit_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Loads the configured registry, or the built-in rigging pipeline.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the registry cannot be loaded.
    pub fn load_registry(&self) -> Result<StageContractRegistry, ConfigurationError> {
        match &self.registry_path {
            Some(path) => StageContractRegistry::from_file(path),
            None => StageContractRegistry::rigging(),
        }
    }

    /// Builds a subprocess supervisor with the configured limits.
    #[must_use]
    pub fn supervisor(&self) -> SubprocessSupervisor {
        SubprocessSupervisor::new()
            .with_output_limit(self.output_limit_bytes)
            .with_reader_grace(self.reader_grace())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.output_limit_bytes, 64 * 1024);
        assert_eq!(config.reader_grace(), Duration::from_secs(2));
        assert!(config.write_status_record);
        assert!(!config.compute_digests);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = OrchestratorConfig::from_json(
            r#"{"jobs_root": "/data/jobs", "log": {"format": "json"}}"#,
        )
        .unwrap();
        assert_eq!(config.jobs_root, PathBuf::from("/data/jobs"));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.reader_grace_ms, 2000);
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_JOBS_ROOT, "/scratch/jobs"),
            (ENV_REGISTRY, "/etc/artifactflow/registry.json"),
            (ENV_LOG_FORMAT, "JSON"),
            (ENV_OUTPUT_LIMIT, "1024"),
        ]);
        let config = OrchestratorConfig::default()
            .apply_env_with(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.jobs_root, PathBuf::from("/scratch/jobs"));
        assert_eq!(
            config.registry_path,
            Some(PathBuf::from("/etc/artifactflow/registry.json"))
        );
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.output_limit_bytes, 1024);
    }

    #[test]
    fn test_env_overlay_rejects_bad_values() {
        let err = OrchestratorConfig::default()
            .apply_env_with(|k| (k == ENV_OUTPUT_LIMIT).then(|| "lots".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::CONFIG_VALUE));

        let err = OrchestratorConfig::default()
            .apply_env_with(|k| (k == ENV_LOG_FORMAT).then(|| "xml".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::CONFIG_VALUE));
    }

    #[test]
    fn test_validate() {
        let config = OrchestratorConfig::default().with_jobs_root("relative/jobs");
        assert_eq!(config.validate().unwrap_err().code(), Some(codes::CONFIG_VALUE));

        let config = OrchestratorConfig::default().with_output_limit(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_and_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"write_status_record": false}"#).unwrap();

        let config = OrchestratorConfig::from_file(&path).unwrap();
        assert!(!config.write_status_record);
        assert_eq!(config.load_registry().unwrap().name(), "rigging");

        let err = OrchestratorConfig::from_file(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(err.code(), Some(codes::CONFIG_LOAD));
    }
}

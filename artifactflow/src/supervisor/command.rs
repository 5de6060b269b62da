//! Command templates and fully resolved invocations.

use crate::contracts::{JobRoot, StageContractRegistry, StageDefinition};
use crate::core::{ArtifactRole, StageId};
use crate::errors::{codes, ConfigurationError, ContractErrorInfo, ResolveError};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable carrying the job id.
pub const ENV_JOB_ID: &str = "ARTIFACTFLOW_JOB_ID";
/// Environment variable carrying the stage id.
pub const ENV_STAGE: &str = "ARTIFACTFLOW_STAGE";
/// Prefix of the per-input-role path variables.
pub const ENV_INPUT_PREFIX: &str = "ARTIFACTFLOW_INPUT_";
/// Prefix of the per-output-role path variables.
pub const ENV_OUTPUT_PREFIX: &str = "ARTIFACTFLOW_OUTPUT_";

#[allow(clippy::expect_used)] // constant pattern
fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([a-z_]+)(?::([a-z0-9-]+))?\}").expect("placeholder pattern is valid")
    })
}

/// A placeholder that may appear in a command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// `{input:<role>}`: absolute path of a required input.
    Input(String),
    /// `{output:<role>}`: absolute path of a produced output.
    Output(String),
    /// `{stage_dir}`: absolute path of the stage directory.
    StageDir,
    /// `{job_root}`: absolute path of the job root.
    JobRoot,
    /// `{job_id}`: the job identity.
    JobId,
}

impl Placeholder {
    fn parse(caps: &Captures<'_>) -> Result<Self, String> {
        let kind = &caps[1];
        let arg = caps.get(2).map(|m| m.as_str().to_string());
        match (kind, arg) {
            ("input", Some(role)) => Ok(Self::Input(role)),
            ("output", Some(role)) => Ok(Self::Output(role)),
            ("stage_dir", None) => Ok(Self::StageDir),
            ("job_root", None) => Ok(Self::JobRoot),
            ("job_id", None) => Ok(Self::JobId),
            _ => Err(caps[0].to_string()),
        }
    }
}

/// How a stage's external worker is launched.
///
/// The program and every argument may contain placeholders; see
/// [`Placeholder`]. Values are substituted verbatim (no shell quoting), so a
/// placeholder always yields exactly one argument fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// The executable.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables (values are templates too).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandTemplate {
    /// Creates a template for a program with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Appends an argument template.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several argument templates.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable template.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .chain(self.env.values().map(String::as_str))
    }

    /// Parses every placeholder in the template.
    ///
    /// # Errors
    ///
    /// Returns the offending text of the first unrecognized placeholder.
    pub fn placeholders(&self) -> Result<Vec<Placeholder>, String> {
        let mut found = Vec::new();
        for field in self.fields() {
            for caps in placeholder_pattern().captures_iter(field) {
                found.push(Placeholder::parse(&caps)?);
            }
        }
        Ok(found)
    }

    /// Checks that the template only references the stage's own roles.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending placeholder.
    pub fn validate_for(&self, definition: &StageDefinition) -> Result<(), ConfigurationError> {
        let template_error = |detail: String| {
            ConfigurationError::new(format!(
                "Command template of stage '{}' is invalid: {detail}",
                definition.id
            ))
            .with_stages(vec![definition.id.to_string()])
            .with_error_info(
                ContractErrorInfo::new(codes::INVALID_TEMPLATE, "Invalid command placeholder")
                    .with_context_entry("stage", definition.id.as_str()),
            )
        };

        if self.program.trim().is_empty() {
            return Err(template_error("program is empty".to_string()));
        }

        let placeholders = self
            .placeholders()
            .map_err(|text| template_error(format!("unknown placeholder {text}")))?;

        for placeholder in placeholders {
            match placeholder {
                Placeholder::Input(role) if !definition.inputs.iter().any(|r| r.as_str() == role) => {
                    return Err(template_error(format!(
                        "{{input:{role}}} is not a declared input"
                    )));
                }
                Placeholder::Output(role)
                    if !definition.outputs.iter().any(|o| o.role.as_str() == role) =>
                {
                    return Err(template_error(format!(
                        "{{output:{role}}} is not a declared output"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn render(&self, field: &str, ctx: &RenderContext<'_>) -> Result<String, String> {
        let mut failure = None;
        let rendered = placeholder_pattern().replace_all(field, |caps: &Captures<'_>| {
            let value = Placeholder::parse(caps).and_then(|p| ctx.value(&p));
            value.unwrap_or_else(|text| {
                failure.get_or_insert(text);
                String::new()
            })
        });
        match failure {
            Some(text) => Err(text),
            None => Ok(rendered.into_owned()),
        }
    }
}

struct RenderContext<'a> {
    job_id: &'a str,
    job_root: &'a JobRoot,
    stage_dir: &'a PathBuf,
    inputs: &'a BTreeMap<ArtifactRole, PathBuf>,
    outputs: &'a BTreeMap<ArtifactRole, PathBuf>,
}

impl RenderContext<'_> {
    fn value(&self, placeholder: &Placeholder) -> Result<String, String> {
        let lookup = |map: &BTreeMap<ArtifactRole, PathBuf>, role: &str, kind: &str| {
            map.get(role)
                .map(|p| p.display().to_string())
                .ok_or_else(|| format!("{{{kind}:{role}}}"))
        };
        match placeholder {
            Placeholder::Input(role) => lookup(self.inputs, role, "input"),
            Placeholder::Output(role) => lookup(self.outputs, role, "output"),
            Placeholder::StageDir => Ok(self.stage_dir.display().to_string()),
            Placeholder::JobRoot => Ok(self.job_root.as_path().display().to_string()),
            Placeholder::JobId => Ok(self.job_id.to_string()),
        }
    }
}

/// A fully resolved request to run one stage's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The job identity.
    pub job_id: String,
    /// The stage being run.
    pub stage: StageId,
    /// The resolved program.
    pub program: String,
    /// The resolved arguments.
    pub args: Vec<String>,
    /// Environment passed to the worker (in addition to the inherited one).
    pub env: BTreeMap<String, String>,
    /// Working directory: the stage directory. Workers must not rely on it;
    /// every path they receive is absolute.
    pub working_dir: PathBuf,
    /// Wall-clock timeout.
    pub timeout: Duration,
    /// Absolute paths of required inputs.
    pub inputs: BTreeMap<ArtifactRole, PathBuf>,
    /// Absolute paths of outputs the worker must produce.
    pub outputs: BTreeMap<ArtifactRole, PathBuf>,
}

impl Invocation {
    /// Resolves a stage's command template for one job.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage or one of its roles cannot be resolved.
    /// A registry that loaded cleanly never produces one.
    pub fn prepare(
        registry: &StageContractRegistry,
        stage: &StageId,
        job_id: &str,
        job_root: &JobRoot,
    ) -> Result<Self, ResolveError> {
        let definition = registry.definition(stage).ok_or_else(|| ResolveError::UnknownStage {
            stage: stage.to_string(),
        })?;
        let resolver = registry.resolver();

        let mut inputs = BTreeMap::new();
        for role in &definition.inputs {
            inputs.insert(role.clone(), resolver.resolve(job_root, stage, role)?);
        }
        let mut outputs = BTreeMap::new();
        for spec in &definition.outputs {
            outputs.insert(spec.role.clone(), resolver.resolve(job_root, stage, &spec.role)?);
        }
        let stage_dir = resolver.stage_dir(job_root, stage)?;

        let ctx = RenderContext {
            job_id,
            job_root,
            stage_dir: &stage_dir,
            inputs: &inputs,
            outputs: &outputs,
        };
        let unresolved = |text: String| ResolveError::UnknownRole {
            stage: stage.to_string(),
            role: text,
        };

        let template = &definition.command;
        let program = template.render(&template.program, &ctx).map_err(unresolved)?;
        let args = template
            .args
            .iter()
            .map(|arg| template.render(arg, &ctx))
            .collect::<Result<Vec<_>, _>>()
            .map_err(unresolved)?;

        let mut env = BTreeMap::new();
        env.insert(ENV_JOB_ID.to_string(), job_id.to_string());
        env.insert(ENV_STAGE.to_string(), stage.to_string());
        for (role, path) in &inputs {
            env.insert(
                format!("{ENV_INPUT_PREFIX}{}", role.env_suffix()),
                path.display().to_string(),
            );
        }
        for (role, path) in &outputs {
            env.insert(
                format!("{ENV_OUTPUT_PREFIX}{}", role.env_suffix()),
                path.display().to_string(),
            );
        }
        for (key, value) in &template.env {
            env.insert(key.clone(), template.render(value, &ctx).map_err(unresolved)?);
        }

        Ok(Self {
            job_id: job_id.to_string(),
            stage: stage.clone(),
            program,
            args,
            env,
            working_dir: stage_dir,
            timeout: definition.timeout(),
            inputs,
            outputs,
        })
    }

    /// The command line as a single display string.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

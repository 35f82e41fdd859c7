use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::workflow::ExecutionResult;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Run failed: {0}")]
    Run(#[from] RunError),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backend binary not found: {0}")]
    BackendNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Malformed or inconsistent role/task definitions.
///
/// Always fatal at load time: a pipeline with a configuration error never
/// starts executing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} '{entry}' is missing required field '{field}'")]
    MissingField {
        kind: &'static str,
        entry: String,
        field: &'static str,
    },

    #[error("Duplicate role name: {0}")]
    DuplicateRole(String),

    #[error("Duplicate task name: {0}")]
    DuplicateTask(String),

    #[error("Task '{task}' references undefined role '{role}'")]
    UnknownRole { task: String, role: String },

    #[error("Task '{task}' depends on undefined task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{task}' references the output of undefined task '{reference}'")]
    UnknownPlaceholder { task: String, reference: String },

    #[error("Task '{task}' depends on '{dependency}', which is defined later in a sequential pipeline")]
    ForwardDependency { task: String, dependency: String },

    #[error("Dependency cycle between tasks: {}", tasks.join(", "))]
    Cycle { tasks: Vec<String> },

    #[error("Tasks '{first}' and '{second}' both write to {}", path.display())]
    DuplicateOutput {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("Role '{role}' lists unknown capability '{capability}'")]
    UnknownCapability { role: String, capability: String },

    #[error("Failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),
}

/// A failed capability invocation.
///
/// Non-fatal by default: the failure is recorded in the task's result and
/// its text is handed back to the role.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("Unknown capability: {0}")]
    Unknown(String),

    #[error("Role '{role}' is not allowed to use capability '{capability}'")]
    NotPermitted { role: String, capability: String },

    #[error("Invalid input for {capability}: {reason}")]
    InvalidInput { capability: String, reason: String },

    #[error("{capability} failed: {reason}")]
    Failed { capability: String, reason: String },

    #[error("{capability} is unavailable: {reason}")]
    Unavailable { capability: String, reason: String },
}

impl CapabilityError {
    pub fn failed(capability: &str, reason: impl ToString) -> Self {
        Self::Failed {
            capability: capability.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_input(capability: &str, reason: impl ToString) -> Self {
        Self::InvalidInput {
            capability: capability.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// The generation backend could not produce a usable answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation backend unavailable: {0}")]
    Unavailable(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Unusable generation response: {0}")]
    Unusable(String),

    #[error("Scripted backend has no response left for task '{0}'")]
    ScriptExhausted(String),
}

/// Why a single task stopped the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("aborted on capability failure: {0}")]
    Capability(#[from] CapabilityError),

    #[error("failed to write artifact {}: {message}", path.display())]
    Artifact { path: PathBuf, message: String },
}

/// A pipeline run that did not finish.
///
/// Task failures carry the results of every task that completed before the
/// failure; their artifacts stay on disk.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Task '{task}' failed: {failure}")]
    Task {
        task: String,
        failure: TaskFailure,
        completed: Vec<ExecutionResult>,
        /// The failed task's own record, with any invocations it made.
        failed: Box<ExecutionResult>,
    },
}

impl RunError {
    /// Results produced before the run stopped.
    pub fn completed(&self) -> &[ExecutionResult] {
        match self {
            RunError::Config(_) => &[],
            RunError::Task { completed, .. } => completed,
        }
    }

    /// Record of the task that stopped the run, if any.
    pub fn failed_result(&self) -> Option<&ExecutionResult> {
        match self {
            RunError::Config(_) => None,
            RunError::Task { failed, .. } => Some(failed),
        }
    }

    /// Name of the task that stopped the run, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            RunError::Config(_) => None,
            RunError::Task { task, .. } => Some(task),
        }
    }
}

//! Run records: identifiers, per-task results and the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::Result;

/// Unique identifier for one pipeline run.
///
/// Uses UUID v4 and offers a short form for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    /// Only optional tasks end up here; a required failure aborts the run.
    Failed,
    /// Not attempted because a dependency did not complete.
    Skipped,
}

impl std::fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Completed => write!(f, "completed"),
            TaskOutcome::Failed => write!(f, "failed"),
            TaskOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// One capability call made while working on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInvocation {
    pub capability: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CapabilityInvocation {
    pub fn succeeded(capability: &str, input: serde_json::Value, output: String) -> Self {
        Self {
            capability: capability.to_string(),
            input,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(capability: &str, input: serde_json::Value, error: String) -> Self {
        Self {
            capability: capability.to_string(),
            input,
            output: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Text handed back to the role as the observation.
    pub fn observation(&self) -> String {
        match (&self.output, &self.error) {
            (_, Some(error)) => format!("Error: {}", error),
            (Some(output), None) => output.clone(),
            (None, None) => String::new(),
        }
    }
}

/// The record of one task's execution within a run.
///
/// Created once per task when the task finishes and never changed after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task: String,
    pub role: String,
    pub outcome: TaskOutcome,
    /// Final answer text; empty unless completed.
    pub output: String,
    /// Instruction after placeholder substitution.
    pub instruction: String,
    #[serde(default)]
    pub invocations: Vec<CapabilityInvocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// Why the task failed or was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        self.outcome == TaskOutcome::Completed
    }

    /// Wall-clock duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Everything a run produced, serialisable as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<ExecutionResult>,
    /// Set when the run aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn result(&self, task: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.task == task)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

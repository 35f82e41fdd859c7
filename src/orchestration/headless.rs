//! Command-line generation backend.
//!
//! Runs a headless assistant CLI (by default `claude -p --output-format json`)
//! once per plan-act step. The prompt is written to the child's stdin, so its
//! size is not bounded by the argument limit. The JSON result is read back
//! from stdout.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::backend::{GenerationBackend, GenerationRequest};
use crate::error::{Error, GenerationError, Result};

/// Default timeout for one backend call (10 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Outcome reported by the backend process.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultType {
    Success { output: String },
    Error { message: String },
}

/// Parsed response of one headless invocation.
#[derive(Debug, Clone)]
pub struct HeadlessResponse {
    pub session_id: Option<String>,
    pub result: ResultType,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
}

impl HeadlessResponse {
    fn plain(result: ResultType) -> Self {
        Self {
            session_id: None,
            result,
            cost_usd: None,
            duration_ms: None,
            num_turns: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, ResultType::Success { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { output } => Some(output),
            ResultType::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.result {
            ResultType::Success { .. } => None,
            ResultType::Error { message } => Some(message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    subtype: Option<String>,
    result: Option<String>,
    session_id: Option<String>,
    total_cost_usd: Option<f64>,
    duration_ms: Option<u64>,
    num_turns: Option<u32>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    is_error: bool,
}

/// Backend that shells out to a headless CLI.
#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    binary: PathBuf,
    /// Extra arguments placed before `-p`.
    args: Vec<String>,
    output_format: String,
    timeout: Duration,
    cwd: PathBuf,
}

impl HeadlessBackend {
    /// Build from a command line such as `claude` or `claude --model sonnet`.
    ///
    /// # Errors
    /// `BackendNotFound` if the program cannot be found on `PATH`.
    pub fn from_command(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::BackendNotFound(command.to_string()))?;
        let binary = which::which(program).map_err(|_| Error::BackendNotFound(program.to_string()))?;
        Ok(Self::with_binary(binary).with_args(parts.map(str::to_string).collect()))
    }

    pub fn with_binary(binary: PathBuf) -> Self {
        Self {
            binary,
            args: Vec::new(),
            output_format: "json".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cwd: PathBuf::from("."),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cwd(mut self, cwd: &Path) -> Self {
        self.cwd = cwd.to_path_buf();
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one prompt and parse the result.
    pub async fn execute(&self, prompt: &str) -> std::result::Result<HeadlessResponse, GenerationError> {
        let output = tokio::time::timeout(self.timeout, self.run(prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
            .map_err(|e| GenerationError::Unavailable(format!("{}: {}", self.binary.display(), e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(response) = Self::parse_json_response(&stdout) {
            return Ok(response);
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                format!(
                    "backend exited with code {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.trim().to_string()
            };
            return Ok(HeadlessResponse::plain(ResultType::Error { message }));
        }

        Ok(HeadlessResponse::plain(ResultType::Success {
            output: stdout.trim().to_string(),
        }))
    }

    async fn run(&self, prompt: &str) -> std::io::Result<Output> {
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .arg("-p")
            .arg("--output-format")
            .arg(&self.output_format)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed the prompt while draining stdout and stderr.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(prompt.as_bytes()).await {
                    Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        output
    }

    /// Parse the backend's JSON result object.
    pub fn parse_json_response(json_str: &str) -> Result<HeadlessResponse> {
        let raw: RawResponse = serde_json::from_str(json_str.trim())?;

        let result = match raw.subtype.as_deref() {
            Some("success") if !raw.is_error => ResultType::Success {
                output: raw.result.unwrap_or_default(),
            },
            Some("success") => ResultType::Error {
                message: raw.error.or(raw.result).unwrap_or_default(),
            },
            Some(other) if other.starts_with("error") => ResultType::Error {
                message: raw
                    .error
                    .or(raw.result)
                    .unwrap_or_else(|| other.to_string()),
            },
            _ => match (raw.error, raw.result) {
                (Some(error), _) => ResultType::Error { message: error },
                (None, Some(result)) => ResultType::Success { output: result },
                (None, None) => ResultType::Error {
                    message: "Unknown response format".to_string(),
                },
            },
        };

        Ok(HeadlessResponse {
            session_id: raw.session_id,
            result,
            cost_usd: raw.total_cost_usd,
            duration_ms: raw.duration_ms,
            num_turns: raw.num_turns,
        })
    }
}

#[async_trait]
impl GenerationBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
        tracing::debug!(
            task = %request.task,
            step = request.step,
            prompt_chars = request.prompt.len(),
            "calling headless backend"
        );
        let response = self.execute(&request.prompt).await?;
        tracing::debug!(
            task = %request.task,
            cost_usd = ?response.cost_usd,
            duration_ms = ?response.duration_ms,
            "headless backend replied"
        );
        match response.result {
            ResultType::Success { output } => Ok(output),
            ResultType::Error { message } => Err(GenerationError::Backend(message)),
        }
    }
}

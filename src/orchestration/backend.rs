//! The generation backend boundary and the textual step protocol.
//!
//! A backend turns a prompt into free text. The executor reads that text as
//! one step of a plan-act loop: either a capability call
//!
//! ```text
//! Thought: I need recent figures.
//! Action: web_search
//! Action Input: {"query": "EV sales 2024"}
//! ```
//!
//! or a final answer (`Final Answer: ...`, or plain text with no action).

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

use crate::core::task::{OutputFormat, OutputSchema};
use crate::error::GenerationError;

static FINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Final Answer\s*:").unwrap());
static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Action\s*:\s*(.*?)\s*$").unwrap());
static ACTION_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Action Input\s*:").unwrap());
static OBSERVATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*Observation\s*:").unwrap());
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").unwrap());

/// One call to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub task: String,
    pub role: String,
    /// Full prompt text including the working context so far.
    pub prompt: String,
    /// Zero-based step within the task's plan-act loop.
    pub step: usize,
    /// The capability budget is spent; only a final answer is accepted.
    pub final_only: bool,
}

/// An opaque text-generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// What the backend asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Action {
        capability: String,
        /// Parsed JSON input; unparseable input is kept as a JSON string so
        /// the registry can reject it.
        input: Value,
    },
    FinalAnswer(String),
}

/// Interpret a backend reply.
///
/// A `Final Answer:` marker wins over any action in the same reply.
pub fn parse_step(reply: &str) -> Result<Step, GenerationError> {
    if reply.trim().is_empty() {
        return Err(GenerationError::Unusable("empty response".to_string()));
    }

    if let Some(m) = FINAL_RE.find(reply) {
        let answer = reply[m.end()..].trim();
        if answer.is_empty() {
            return Err(GenerationError::Unusable("empty final answer".to_string()));
        }
        return Ok(Step::FinalAnswer(answer.to_string()));
    }

    let Some(caps) = ACTION_RE.captures(reply) else {
        return Ok(Step::FinalAnswer(reply.trim().to_string()));
    };
    let capability = caps[1].trim().to_string();
    if capability.is_empty() {
        return Err(GenerationError::Unusable("action without a capability name".to_string()));
    }

    let input = match ACTION_INPUT_RE.find(reply) {
        Some(m) => {
            let rest = &reply[m.end()..];
            let raw = match OBSERVATION_RE.find(rest) {
                Some(obs) => &rest[..obs.start()],
                None => rest,
            };
            parse_input(raw)
        }
        None => Value::Object(Default::default()),
    };

    Ok(Step::Action { capability, input })
}

fn parse_input(raw: &str) -> Value {
    let raw = strip_fences(raw);
    if raw.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// The reply with every action line and anything after it removed.
///
/// Used when a backend keeps asking for capabilities after its budget is
/// spent: whatever it wrote before the action is taken as the answer.
pub fn strip_action(reply: &str) -> Result<String, GenerationError> {
    let head = match ACTION_RE.find(reply) {
        Some(m) => &reply[..m.start()],
        None => reply,
    };
    let head = head.trim();
    let head = head
        .strip_prefix("Thought:")
        .map(str::trim)
        .unwrap_or(head);
    if head.is_empty() {
        return Err(GenerationError::Unusable(
            "capability budget exhausted and no answer given".to_string(),
        ));
    }
    Ok(head.to_string())
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_fences(text: &str) -> &str {
    match FENCE_RE.captures(text) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim()).unwrap_or(""),
        None => text.trim(),
    }
}

/// Check a final answer against the task's output format and, for JSON
/// answers, its required keys.
pub fn normalize_answer(
    answer: &str,
    format: OutputFormat,
    schema: Option<&OutputSchema>,
) -> Result<String, GenerationError> {
    match format {
        OutputFormat::Json => {
            let body = strip_fences(answer);
            let value = serde_json::from_str::<Value>(body)
                .map_err(|e| GenerationError::Unusable(format!("answer is not valid JSON: {}", e)))?;
            if let Some(schema) = schema {
                schema.check(&value).map_err(GenerationError::Unusable)?;
            }
            Ok(body.to_string())
        }
        OutputFormat::Text | OutputFormat::Markdown => Ok(answer.trim().to_string()),
    }
}

//! Pipeline executor.
//!
//! Runs the tasks of a pipeline one at a time in dependency order. Each task
//! is worked through a bounded plan-act loop against the generation backend:
//! the backend either asks for a capability (whose result is fed back as an
//! observation) or gives its final answer.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::backend::{normalize_answer, parse_step, strip_action, GenerationBackend, GenerationRequest, Step};
use super::rate_limit::{RateLimiter, PIPELINE_SCOPE};
use crate::capability::CapabilityRegistry;
use crate::core::role::{Role, RoleRegistry};
use crate::core::task::{OutputFormat, Process, Task, TaskRegistry};
use crate::core::template::render_inputs;
use crate::error::{ConfigError, RunError, TaskFailure};
use crate::workflow::{CapabilityInvocation, ExecutionResult, RunId, RunReport, TaskOutcome};

/// Capability calls allowed per task when the role sets no limit.
pub const DEFAULT_MAX_CAPABILITY_CALLS: usize = 5;

const FINAL_NOTICE: &str = "You have used all the capability calls available for this task. \
Do not call any more capabilities. Give your final answer now, starting with 'Final Answer:'.";

/// Lifecycle notifications emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    TaskStarted { task: String, role: String },
    CapabilityInvoked { task: String, capability: String, success: bool },
    TaskCompleted { task: String },
    TaskFailed { task: String, error: String },
    TaskSkipped { task: String, reason: String },
    RunComplete { run_id: RunId },
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub default_max_capability_calls: usize,
    /// Treat a failed capability call as fatal instead of feeding the error
    /// back to the role.
    pub abort_on_capability_error: bool,
    /// Relative artifact paths are resolved against this directory.
    pub output_dir: PathBuf,
    /// Backend requests per minute across all roles.
    pub max_rpm: Option<u32>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_max_capability_calls: DEFAULT_MAX_CAPABILITY_CALLS,
            abort_on_capability_error: false,
            output_dir: PathBuf::from("."),
            max_rpm: None,
        }
    }
}

/// State of one run. Created by `run` and dropped when it returns.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: RunId,
    pub inputs: HashMap<String, String>,
    /// Final answers of completed tasks, by task name.
    pub outputs: HashMap<String, String>,
    pub results: Vec<ExecutionResult>,
}

impl RunContext {
    fn new(inputs: HashMap<String, String>) -> Self {
        Self {
            run_id: RunId::new(),
            inputs,
            outputs: HashMap::new(),
            results: Vec::new(),
        }
    }

    fn outcome(&self, task: &str) -> Option<TaskOutcome> {
        self.results.iter().find(|r| r.task == task).map(|r| r.outcome)
    }
}

pub struct PipelineExecutor {
    backend: Arc<dyn GenerationBackend>,
    capabilities: CapabilityRegistry,
    settings: ExecutorSettings,
    limiter: RateLimiter,
    event_tx: Option<mpsc::Sender<ExecutorEvent>>,
}

impl PipelineExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        capabilities: CapabilityRegistry,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            backend,
            capabilities,
            settings,
            limiter: RateLimiter::new(),
            event_tx: None,
        }
    }

    /// Send lifecycle events to `tx` during runs.
    pub fn with_events(mut self, tx: mpsc::Sender<ExecutorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    async fn emit(&self, event: ExecutorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run every task of the pipeline.
    ///
    /// Returns one result per task in execution order. A required task
    /// whose generation fails stops the run; the error carries the results
    /// completed so far and their artifacts stay on disk.
    pub async fn run(
        &self,
        tasks: &TaskRegistry,
        roles: &RoleRegistry,
        inputs: HashMap<String, String>,
    ) -> Result<Vec<ExecutionResult>, RunError> {
        self.run_in(RunContext::new(inputs), tasks, roles).await
    }

    /// Run the pipeline and describe the outcome as a report.
    ///
    /// The report lists every result produced before any failure; the
    /// failure itself is returned alongside it.
    pub async fn run_report(
        &self,
        pipeline: &str,
        tasks: &TaskRegistry,
        roles: &RoleRegistry,
        inputs: HashMap<String, String>,
    ) -> (RunReport, Option<RunError>) {
        let ctx = RunContext::new(inputs);
        let run_id = ctx.run_id;
        let started_at = Utc::now();
        let (results, error) = match self.run_in(ctx, tasks, roles).await {
            Ok(results) => (results, None),
            Err(e) => {
                let mut results = e.completed().to_vec();
                results.extend(e.failed_result().cloned());
                (results, Some(e))
            }
        };
        let report = RunReport {
            run_id,
            pipeline: pipeline.to_string(),
            started_at,
            finished_at: Utc::now(),
            results,
            failure: error.as_ref().map(|e| e.to_string()),
        };
        (report, error)
    }

    async fn run_in(
        &self,
        mut ctx: RunContext,
        tasks: &TaskRegistry,
        roles: &RoleRegistry,
    ) -> Result<Vec<ExecutionResult>, RunError> {
        self.capabilities.check_roles(roles)?;

        tracing::info!(
            run_id = %ctx.run_id.short(),
            tasks = tasks.len(),
            process = %tasks.process(),
            backend = self.backend.name(),
            "pipeline run started"
        );

        for task in tasks.execution_order() {
            let role = roles.get(&task.role).ok_or_else(|| ConfigError::UnknownRole {
                task: task.name.clone(),
                role: task.role.clone(),
            })?;

            if let Some(reason) = self.blocked_by(task, &ctx) {
                tracing::info!(task = %task.name, %reason, "task skipped");
                self.emit(ExecutorEvent::TaskSkipped {
                    task: task.name.clone(),
                    reason: reason.clone(),
                })
                .await;
                let now = Utc::now();
                ctx.results.push(ExecutionResult {
                    task: task.name.clone(),
                    role: role.name.clone(),
                    outcome: TaskOutcome::Skipped,
                    output: String::new(),
                    instruction: task.instruction.render(&ctx.outputs, &ctx.inputs),
                    invocations: Vec::new(),
                    artifact: None,
                    error: Some(reason),
                    started_at: now,
                    finished_at: now,
                });
                continue;
            }

            let result = self.execute_task(task, role, tasks, &ctx).await;
            match result {
                Ok(result) => {
                    ctx.outputs.insert(task.name.clone(), result.output.clone());
                    ctx.results.push(result);
                }
                Err((failure, partial)) => {
                    let abort = !task.optional || matches!(failure, TaskFailure::Capability(_));
                    tracing::warn!(task = %task.name, error = %failure, optional = task.optional, "task failed");
                    self.emit(ExecutorEvent::TaskFailed {
                        task: task.name.clone(),
                        error: failure.to_string(),
                    })
                    .await;
                    if abort {
                        return Err(RunError::Task {
                            task: task.name.clone(),
                            failure,
                            completed: ctx.results,
                            failed: Box::new(partial),
                        });
                    }
                    ctx.results.push(partial);
                }
            }
        }

        tracing::info!(run_id = %ctx.run_id.short(), "pipeline run finished");
        self.emit(ExecutorEvent::RunComplete { run_id: ctx.run_id }).await;
        Ok(ctx.results)
    }

    /// Why a task cannot start, if one of its dependencies did not complete.
    fn blocked_by(&self, task: &Task, ctx: &RunContext) -> Option<String> {
        task.depends_on.iter().find_map(|dep| match ctx.outcome(dep) {
            Some(TaskOutcome::Completed) => None,
            Some(outcome) => Some(format!("dependency '{}' {}", dep, outcome)),
            None => Some(format!("dependency '{}' did not run", dep)),
        })
    }

    /// Work one task to a final answer and write its artifact.
    ///
    /// On failure the partially filled result (outcome `Failed`) is returned
    /// alongside the failure.
    async fn execute_task(
        &self,
        task: &Task,
        role: &Role,
        tasks: &TaskRegistry,
        ctx: &RunContext,
    ) -> Result<ExecutionResult, (TaskFailure, ExecutionResult)> {
        let started_at = Utc::now();
        let instruction = task.instruction.render(&ctx.outputs, &ctx.inputs);
        tracing::info!(task = %task.name, role = %role.name, "task started");
        self.emit(ExecutorEvent::TaskStarted {
            task: task.name.clone(),
            role: role.name.clone(),
        })
        .await;

        let prompt = self.base_prompt(task, role, &instruction, &context_block(task, tasks, ctx), ctx);
        let mut invocations = Vec::new();
        let answer = self.work(task, role, &prompt, &mut invocations).await;

        let mut result = ExecutionResult {
            task: task.name.clone(),
            role: role.name.clone(),
            outcome: TaskOutcome::Completed,
            output: String::new(),
            instruction,
            invocations,
            artifact: None,
            error: None,
            started_at,
            finished_at: started_at,
        };

        let output = match answer {
            Ok(output) => output,
            Err(failure) => return Err(fail(result, failure)),
        };

        if let Some(path) = &task.output {
            let full = self.artifact_path(path);
            if let Err(e) = write_artifact(&full, &output).await {
                result.output = output;
                return Err(fail(
                    result,
                    TaskFailure::Artifact {
                        path: full,
                        message: e.to_string(),
                    },
                ));
            }
            tracing::info!(task = %task.name, path = %full.display(), "artifact written");
            result.artifact = Some(full);
        }

        result.output = output;
        result.finished_at = Utc::now();
        tracing::info!(
            task = %task.name,
            invocations = result.invocations.len(),
            duration_ms = result.duration_ms(),
            "task completed"
        );
        self.emit(ExecutorEvent::TaskCompleted {
            task: task.name.clone(),
        })
        .await;
        Ok(result)
    }

    /// The plan-act loop.
    async fn work(
        &self,
        task: &Task,
        role: &Role,
        prompt: &str,
        invocations: &mut Vec<CapabilityInvocation>,
    ) -> Result<String, TaskFailure> {
        let budget = role
            .max_capability_calls
            .unwrap_or(self.settings.default_max_capability_calls);
        let mut scratchpad = String::new();
        let mut step = 0;

        loop {
            let final_only = invocations.len() >= budget;
            let mut full_prompt = format!("{}{}", prompt, scratchpad);
            if final_only && !role.capabilities.is_empty() {
                full_prompt.push_str("\n\n");
                full_prompt.push_str(FINAL_NOTICE);
            }
            let request = GenerationRequest {
                task: task.name.clone(),
                role: role.name.clone(),
                prompt: full_prompt,
                step,
                final_only,
            };

            self.throttle(task, role).await;
            let reply = self.backend.generate(&request).await?;
            let answer = match parse_step(&reply)? {
                Step::FinalAnswer(answer) => answer,
                Step::Action { .. } if final_only => {
                    tracing::debug!(task = %task.name, "budget spent, taking reply as final answer");
                    strip_action(&reply)?
                }
                Step::Action { capability, input } => {
                    let invocation = match self.capabilities.invoke(role, &capability, &input).await {
                        Ok(output) => CapabilityInvocation::succeeded(&capability, input, output),
                        Err(e) if self.settings.abort_on_capability_error => {
                            invocations.push(CapabilityInvocation::failed(&capability, input, e.to_string()));
                            return Err(TaskFailure::Capability(e));
                        }
                        Err(e) => CapabilityInvocation::failed(&capability, input, e.to_string()),
                    };
                    self.emit(ExecutorEvent::CapabilityInvoked {
                        task: task.name.clone(),
                        capability: capability.clone(),
                        success: invocation.is_success(),
                    })
                    .await;

                    scratchpad.push_str("\n\n");
                    scratchpad.push_str(reply.trim());
                    scratchpad.push_str("\nObservation: ");
                    scratchpad.push_str(&invocation.observation());
                    invocations.push(invocation);
                    step += 1;
                    continue;
                }
            };
            return Ok(normalize_answer(
                &answer,
                task.output_format,
                task.output_schema.as_ref(),
            )?);
        }
    }

    /// Hold a backend call until the pipeline and role limits allow it.
    async fn throttle(&self, task: &Task, role: &Role) {
        let mut waited = std::time::Duration::ZERO;
        if let Some(rpm) = self.settings.max_rpm {
            waited += self.limiter.acquire(PIPELINE_SCOPE, rpm).await;
        }
        if let Some(rpm) = role.max_rpm {
            waited += self.limiter.acquire(&format!("role:{}", role.name), rpm).await;
        }
        if !waited.is_zero() {
            tracing::info!(
                task = %task.name,
                role = %role.name,
                waited_ms = waited.as_millis() as u64,
                "backend call delayed by rate limit"
            );
        }
    }

    fn base_prompt(
        &self,
        task: &Task,
        role: &Role,
        instruction: &str,
        context: &str,
        ctx: &RunContext,
    ) -> String {
        let mut prompt = format!(
            "You are {}.\n{}\nYour personal goal is: {}\n",
            render_inputs(role.display_title(), &ctx.inputs),
            render_inputs(&role.persona, &ctx.inputs),
            render_inputs(&role.objective, &ctx.inputs),
        );
        if role.inject_date {
            prompt.push_str(&format!("Current date: {}\n", Utc::now().format("%Y-%m-%d")));
        }

        let schemas: Vec<String> = role
            .capabilities
            .iter()
            .filter_map(|name| self.capabilities.schema(name))
            .map(|schema| format!("- {}", schema.describe()))
            .collect();
        if schemas.is_empty() {
            prompt.push_str("\nReply with your final answer, starting with 'Final Answer:'.\n");
        } else {
            prompt.push_str("\nYou can use these capabilities:\n");
            prompt.push_str(&schemas.join("\n"));
            prompt.push_str(
                "\n\nTo use a capability, reply with exactly:\n\
                 Thought: <your reasoning>\n\
                 Action: <capability name>\n\
                 Action Input: <JSON object with the inputs>\n\
                 \nWhen you know the answer, reply with:\n\
                 Final Answer: <your complete answer>\n",
            );
        }

        prompt.push_str(&format!("\nTask: {}\n", instruction));
        if let Some(expected) = &task.expected_output {
            prompt.push_str(&format!(
                "Expected output: {}\n",
                render_inputs(expected, &ctx.inputs)
            ));
        }
        match (task.output_format, &task.output_schema) {
            (OutputFormat::Json, Some(schema)) => prompt.push_str(&format!(
                "Your final answer must be a JSON object only, with the keys {}.\n",
                schema.describe()
            )),
            (OutputFormat::Json, None) => prompt.push_str("Your final answer must be valid JSON only.\n"),
            (OutputFormat::Markdown, _) => prompt.push_str("Format your final answer as Markdown.\n"),
            (OutputFormat::Text, _) => {}
        }
        if !context.is_empty() {
            prompt.push_str("\nContext from earlier tasks:\n");
            prompt.push_str(context);
        }
        prompt
    }

    fn artifact_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.settings.output_dir.join(path)
        }
    }
}

fn fail(mut result: ExecutionResult, failure: TaskFailure) -> (TaskFailure, ExecutionResult) {
    result.outcome = TaskOutcome::Failed;
    result.error = Some(failure.to_string());
    result.finished_at = Utc::now();
    (failure, result)
}

/// Outputs of the task's dependencies that are not already substituted
/// into its instruction. A sequential task without dependencies gets the
/// previous task's output instead.
fn context_block(task: &Task, tasks: &TaskRegistry, ctx: &RunContext) -> String {
    let inlined = task.instruction.output_refs();
    let mut names: Vec<&str> = task
        .depends_on
        .iter()
        .filter(|dep| !inlined.contains(dep))
        .map(String::as_str)
        .collect();
    if task.depends_on.is_empty() && tasks.process() == Process::Sequential {
        if let Some(previous) = tasks.previous(&task.name) {
            names.push(&previous.name);
        }
    }

    names
        .into_iter()
        .filter_map(|name| ctx.outputs.get(name).map(|output| (name, output)))
        .map(|(name, output)| format!("## {}\n{}\n", name, output))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn write_artifact(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use crewflow::capability::CapabilityRegistry;
use crewflow::config::Config;
use crewflow::orchestration::{
    ExecutorEvent, GenerationBackend, HeadlessBackend, PipelineExecutor, ScriptedBackend,
};
use crewflow::workflow::{Pipeline, RunReport, TaskOutcome};
use crewflow::{Error, Result};

/// crewflow - run declarative multi-role task pipelines
#[derive(Parser, Debug)]
#[command(name = "crewflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CREWFLOW_DEBUG=1   Enable debug logging (alternative to --debug)\n    SERPER_API_KEY     API key for the web_search capability")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.crewflow/crewflow.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the pipeline definition comes from.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct PipelineArgs {
    /// Pipeline file (.yaml, .yml or .toml)
    #[arg(conflicts_with_all = ["roles", "tasks"], required_unless_present_all = ["roles", "tasks"])]
    pub pipeline: Option<PathBuf>,

    /// Separate roles file (crew-style agents.yaml)
    #[arg(long, requires = "tasks")]
    pub roles: Option<PathBuf>,

    /// Separate tasks file (crew-style tasks.yaml)
    #[arg(long, requires = "roles")]
    pub tasks: Option<PathBuf>,
}

impl PipelineArgs {
    fn load(&self) -> Result<Pipeline> {
        match (&self.pipeline, &self.roles, &self.tasks) {
            (Some(path), _, _) => Pipeline::load(path),
            (None, Some(roles), Some(tasks)) => Pipeline::load_split(roles, tasks),
            _ => Err(Error::Validation(
                "give a pipeline file or both --roles and --tasks".to_string(),
            )),
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a pipeline
    Run {
        #[command(flatten)]
        source: PipelineArgs,

        /// Run input as key=value (repeatable)
        #[arg(short = 'i', long = "input", value_parser = parse_key_val)]
        inputs: Vec<(String, String)>,

        /// Replay backend replies from a script file instead of calling the backend
        #[arg(long)]
        script: Option<PathBuf>,

        /// Write a JSON run report
        #[arg(long)]
        report: Option<PathBuf>,

        /// Directory for task artifacts
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Check a pipeline and print its execution order
    Validate {
        #[command(flatten)]
        source: PipelineArgs,
    },

    /// List the built-in capabilities
    Capabilities,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    crewflow::log::init_with_debug(cli.debug);
    tracing::info!(debug = crewflow::log::is_debug(), "crewflow starting");

    match cli.command {
        Command::Run {
            source,
            inputs,
            script,
            report,
            output_dir,
        } => run_pipeline(&source, &inputs, script, report, output_dir),
        Command::Validate { source } => run_validate(&source),
        Command::Capabilities => run_capabilities(),
    }
}

fn run_pipeline(
    source: &PipelineArgs,
    overrides: &[(String, String)],
    script: Option<PathBuf>,
    report_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let config = Config::load()?;
    let pipeline = source.load()?;
    let inputs = pipeline.run_inputs(overrides);
    warn_missing_inputs(&pipeline, &inputs);

    let backend: Arc<dyn GenerationBackend> = match &script {
        Some(path) => Arc::new(ScriptedBackend::load(path)?),
        None => Arc::new(
            HeadlessBackend::from_command(config.effective_backend())?
                .with_timeout(config.timeout())
                .with_cwd(&config.workspace_dir()),
        ),
    };
    let capabilities = CapabilityRegistry::builtin(&config.capability_settings())?;
    let output_dir = output_dir
        .or_else(|| pipeline.output_dir())
        .unwrap_or_else(|| PathBuf::from("."));
    let settings = config.executor_settings(&pipeline.settings, output_dir);

    println!("Running pipeline: {}", pipeline.name);
    println!("Backend:          {}", backend.name());
    println!();

    let rt = tokio::runtime::Runtime::new()?;
    let (report, error) = rt.block_on(async {
        let (tx, rx) = mpsc::channel(64);
        let printer = tokio::spawn(print_events(rx));
        let executor = PipelineExecutor::new(backend, capabilities, settings).with_events(tx);
        let outcome = executor
            .run_report(&pipeline.name, &pipeline.tasks, &pipeline.roles, inputs)
            .await;
        drop(executor);
        let _ = printer.await;
        outcome
    });

    print_summary(&report);
    if let Some(path) = &report_path {
        report.write(path)?;
        println!("Report written to {}", path.display());
    }

    match error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn print_events(mut rx: mpsc::Receiver<ExecutorEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ExecutorEvent::TaskStarted { task, role } => println!("> {} ({})", task, role),
            ExecutorEvent::CapabilityInvoked {
                capability, success, ..
            } => println!(
                "    {} {}",
                capability,
                if success { "ok" } else { "failed" }
            ),
            ExecutorEvent::TaskCompleted { task } => println!("  {} completed", task),
            ExecutorEvent::TaskFailed { task, error } => println!("  {} failed: {}", task, error),
            ExecutorEvent::TaskSkipped { task, reason } => println!("  {} skipped: {}", task, reason),
            ExecutorEvent::RunComplete { run_id } => println!("Run {} complete", run_id.short()),
        }
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("  Run ID:    {}", report.run_id.short());
    println!("  Pipeline:  {}", report.pipeline);
    println!(
        "  Status:    {}",
        if report.succeeded() { "completed" } else { "failed" }
    );
    for result in &report.results {
        let artifact = result
            .artifact
            .as_ref()
            .map(|p| format!(" -> {}", p.display()))
            .unwrap_or_default();
        println!(
            "    {:<24} {:<10} {} calls{}",
            result.task,
            result.outcome.to_string(),
            result.invocations.len(),
            artifact
        );
    }
    if let Some(failure) = &report.failure {
        println!("  Failure:   {}", failure);
    }

    if let Some(last) = report
        .results
        .iter()
        .rev()
        .find(|r| r.outcome == TaskOutcome::Completed)
    {
        println!();
        println!("{}", last.output);
    }
}

fn warn_missing_inputs(pipeline: &Pipeline, inputs: &HashMap<String, String>) {
    let missing = pipeline.missing_inputs(inputs);
    if !missing.is_empty() {
        tracing::warn!(?missing, "run inputs without a value");
        eprintln!(
            "warning: no value for input(s) {}; placeholders are left as written",
            missing.join(", ")
        );
    }
}

fn run_validate(source: &PipelineArgs) -> Result<()> {
    let config = Config::load()?;
    let pipeline = source.load()?;
    CapabilityRegistry::builtin(&config.capability_settings())?.check_roles(&pipeline.roles)?;

    println!(
        "Pipeline '{}': {} roles, {} tasks, {} order",
        pipeline.name,
        pipeline.roles.len(),
        pipeline.tasks.len(),
        pipeline.tasks.process()
    );
    for (i, task) in pipeline.tasks.execution_order().enumerate() {
        let deps = if task.depends_on.is_empty() {
            String::new()
        } else {
            format!(" <- {}", task.depends_on.join(", "))
        };
        println!("  {}. {} ({}){}", i + 1, task.name, task.role, deps);
    }
    warn_missing_inputs(&pipeline, &pipeline.run_inputs(&[]));
    Ok(())
}

fn run_capabilities() -> Result<()> {
    let config = Config::load()?;
    let registry = CapabilityRegistry::builtin(&config.capability_settings())?;
    for schema in registry.schemas() {
        println!("{}", schema.describe());
    }
    Ok(())
}

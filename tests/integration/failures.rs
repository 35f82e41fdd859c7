//! Configuration errors and failure handling during runs.

use std::sync::Arc;

use crewflow::capability::CapabilityRegistry;
use crewflow::orchestration::ScriptedBackend;
use crewflow::workflow::{Pipeline, TaskOutcome};
use crewflow::{ConfigError, Error, GenerationError, RunError, TaskFailure};

use crate::fixtures::{executor, flaky_capabilities, no_inputs, Workspace, TWEET_PIPELINE};

fn config_error(err: Error) -> ConfigError {
    match err {
        Error::Config(e) => e,
        other => panic!("Expected configuration error, got {:?}", other),
    }
}

#[test]
fn test_cycle_rejected_at_load() {
    let ws = Workspace::new();
    let path = ws.write(
        "cycle.yaml",
        r#"
roles:
  - name: Writer
    objective: w
    persona: p
tasks:
  - name: A
    role: Writer
    instruction: use {B.output}
  - name: B
    role: Writer
    instruction: use {A.output}
"#,
    );

    let err = config_error(Pipeline::load(&path).unwrap_err());
    assert_eq!(
        err,
        ConfigError::Cycle {
            tasks: vec!["A".to_string(), "B".to_string()]
        }
    );
}

#[test]
fn test_undefined_role_rejected() {
    let ws = Workspace::new();
    let path = ws.write(
        "bad.yaml",
        r#"
roles:
  - name: Writer
    objective: w
    persona: p
tasks:
  - name: T1
    role: Editor
    instruction: edit
"#,
    );

    let err = config_error(Pipeline::load(&path).unwrap_err());
    assert_eq!(
        err,
        ConfigError::UnknownRole {
            task: "T1".to_string(),
            role: "Editor".to_string()
        }
    );
}

#[test]
fn test_duplicate_role_rejected() {
    let ws = Workspace::new();
    let path = ws.write(
        "dup.yaml",
        r#"
roles:
  - name: Writer
    objective: w
    persona: p
  - name: Writer
    objective: again
    persona: p
tasks: []
"#,
    );

    let err = config_error(Pipeline::load(&path).unwrap_err());
    assert_eq!(err, ConfigError::DuplicateRole("Writer".to_string()));
}

#[test]
fn test_unsupported_extension() {
    let ws = Workspace::new();
    let path = ws.write("pipeline.json", "{}");
    let err = config_error(Pipeline::load(&path).unwrap_err());
    assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
}

#[tokio::test]
async fn test_capability_failure_recorded_and_run_continues() {
    let ws = Workspace::new();
    let path = ws.write(
        "research.yaml",
        r#"
roles:
  - name: Researcher
    objective: Find facts
    persona: Thorough.
    capabilities: [flaky_search]
tasks:
  - name: research
    role: Researcher
    instruction: research EVs
  - name: summary
    role: Researcher
    instruction: summarise {research.output}
"#,
    );
    let pipeline = Pipeline::load(&path).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(
                "research",
                "Thought: search first\nAction: flaky_search\nAction Input: {\"query\": \"EVs\"}",
            )
            .with_reply("research", "Final Answer: nothing found")
            .with_reply("summary", "Final Answer: no data"),
    );

    let results = executor(&backend, flaky_capabilities(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, no_inputs())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.outcome == TaskOutcome::Completed));
    let invocation = &results[0].invocations[0];
    assert_eq!(invocation.capability, "flaky_search");
    assert_eq!(
        invocation.error.as_deref(),
        Some("flaky_search failed: connection refused")
    );
    assert!(backend.requests()[1]
        .prompt
        .contains("Observation: Error: flaky_search failed: connection refused"));
}

#[tokio::test]
async fn test_artifacts_kept_after_later_failure() {
    let ws = Workspace::new();
    let pipeline = Pipeline::load(&ws.write("tweets.yaml", TWEET_PIPELINE)).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply("T1", "Final Answer: rust, async, tokio")
            .with_error("T2", "rate limited"),
    );

    let err = executor(&backend, CapabilityRegistry::new(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, no_inputs())
        .await
        .unwrap_err();

    assert_eq!(err.task(), Some("T2"));
    assert_eq!(err.completed().len(), 1);
    assert!(matches!(
        err,
        RunError::Task {
            failure: TaskFailure::Generation(GenerationError::Backend(_)),
            ..
        }
    ));
    assert_eq!(ws.read("keywords.txt"), "rust, async, tokio");
    assert!(!ws.exists("tweet.txt"));
}

#[tokio::test]
async fn test_optional_task_failure_skips_dependents() {
    let ws = Workspace::new();
    let path = ws.write(
        "optional.yaml",
        r#"
roles:
  - name: Writer
    objective: w
    persona: p
tasks:
  - name: images
    role: Writer
    instruction: suggest images
    optional: true
  - name: captions
    role: Writer
    instruction: caption {images.output}
  - name: post
    role: Writer
    instruction: write the post
    output: post.md
"#,
    );
    let pipeline = Pipeline::load(&path).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_error("images", "image model offline")
            .with_reply("post", "Final Answer: the post"),
    );

    let (report, error) = executor(&backend, CapabilityRegistry::new(), ws.settings())
        .run_report(&pipeline.name, &pipeline.tasks, &pipeline.roles, no_inputs())
        .await;

    assert!(error.is_none());
    let outcome = |task: &str| report.result(task).map(|r| r.outcome);
    assert_eq!(outcome("images"), Some(TaskOutcome::Failed));
    assert_eq!(outcome("captions"), Some(TaskOutcome::Skipped));
    assert_eq!(outcome("post"), Some(TaskOutcome::Completed));
    assert_eq!(ws.read("post.md"), "the post");
}

#[tokio::test]
async fn test_output_json_wrong_kind_fails_and_is_reported() {
    let ws = Workspace::new();
    let path = ws.write(
        "brief.yaml",
        r#"
roles:
  - name: Strategist
    goal: Plan content
    backstory: Plans campaigns.
tasks:
  - name: brief
    agent: Strategist
    description: write a content brief
    output_json:
      topic: string
      tags: list
"#,
    );
    let pipeline = Pipeline::load(&path).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new().with_reply("brief", "Final Answer: {\"topic\": \"EVs\", \"tags\": \"ev\"}"),
    );

    let (report, error) = executor(&backend, CapabilityRegistry::new(), ws.settings())
        .run_report(&pipeline.name, &pipeline.tasks, &pipeline.roles, no_inputs())
        .await;

    let error = error.unwrap();
    assert!(matches!(
        error,
        RunError::Task {
            failure: TaskFailure::Generation(GenerationError::Unusable(_)),
            ..
        }
    ));
    assert!(error.to_string().contains("'tags'"));
    let brief = report.result("brief").unwrap();
    assert_eq!(brief.outcome, TaskOutcome::Failed);
    assert!(brief.error.as_deref().unwrap().contains("list of strings"));
}

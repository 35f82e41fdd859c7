//! End-to-end runs of pipelines loaded from disk.

use std::sync::Arc;

use crewflow::capability::CapabilityRegistry;
use crewflow::core::Process;
use crewflow::orchestration::ScriptedBackend;
use crewflow::workflow::{Pipeline, RunReport, TaskOutcome};

use crate::fixtures::{executor, no_inputs, Workspace, TWEET_PIPELINE};

#[tokio::test]
async fn test_two_task_pipeline_from_file() {
    let ws = Workspace::new();
    let path = ws.write("tweets.yaml", TWEET_PIPELINE);
    let pipeline = Pipeline::load(&path).unwrap();
    assert_eq!(pipeline.name, "tweets");

    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply("T1", "Final Answer: rust, async, tokio")
            .with_reply("T2", "Final Answer: Shipping rust with async and tokio today!"),
    );

    let results = executor(&backend, CapabilityRegistry::new(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, no_inputs())
        .await
        .unwrap();

    let order: Vec<_> = results.iter().map(|r| r.task.as_str()).collect();
    assert_eq!(order, vec!["T1", "T2"]);
    assert_eq!(results[1].instruction, "write a tweet using rust, async, tokio");
    assert!(results.iter().all(|r| r.outcome == TaskOutcome::Completed));

    assert_eq!(ws.read("keywords.txt"), "rust, async, tokio");
    assert_eq!(ws.read("tweet.txt"), "Shipping rust with async and tokio today!");
    assert_eq!(backend.remaining(), 0);
}

#[tokio::test]
async fn test_dependencies_reorder_tasks() {
    let ws = Workspace::new();
    let path = ws.write(
        "report.toml",
        r#"
[[roles]]
name = "Analyst"
objective = "Summarise findings"
persona = "Careful."

[[tasks]]
name = "summary"
role = "Analyst"
instruction = "Summarise {research.output}"

[[tasks]]
name = "research"
role = "Analyst"
instruction = "Research {topic}"
"#,
    );
    let pipeline = Pipeline::load(&path).unwrap();
    assert_eq!(pipeline.name, "report");

    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply("research", "Final Answer: batteries are cheaper")
            .with_reply("summary", "Final Answer: cheaper batteries"),
    );
    let inputs = pipeline.run_inputs(&[("topic".to_string(), "EVs".to_string())]);

    let results = executor(&backend, CapabilityRegistry::new(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, inputs)
        .await
        .unwrap();

    assert_eq!(results[0].task, "research");
    assert_eq!(results[0].instruction, "Research EVs");
    assert_eq!(results[1].instruction, "Summarise batteries are cheaper");
}

#[tokio::test]
async fn test_crew_style_split_files_run_sequentially() {
    let ws = Workspace::new();
    let roles = ws.write(
        "config/agents.yaml",
        r#"
market_researcher:
  role: Senior market researcher
  goal: Find trends about {product}
  backstory: Ten years of market analysis.
content_writer:
  role: Content writer
  goal: Write engaging copy
  backstory: Writes for busy readers.
"#,
    );
    let tasks = ws.write(
        "config/tasks.yaml",
        r#"
process: sequential
tasks:
  research_task:
    description: Research the market for {product}
    expected_output: A list of trends
    agent: market_researcher
  write_task:
    description: Write a blog post
    expected_output: A markdown post
    agent: content_writer
    output_file: post.md
"#,
    );

    let pipeline = Pipeline::load_split(&roles, &tasks).unwrap();
    assert_eq!(pipeline.name, "tasks");
    assert_eq!(pipeline.tasks.process(), Process::Sequential);

    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply("research_task", "Final Answer: trend one, trend two")
            .with_reply("write_task", "Final Answer: # Trends\n\nTwo of them."),
    );
    let settings = crewflow::orchestration::ExecutorSettings {
        output_dir: pipeline.base_dir.clone(),
        ..Default::default()
    };
    let inputs = pipeline.run_inputs(&[("product".to_string(), "crewflow".to_string())]);

    executor(&backend, CapabilityRegistry::new(), settings)
        .run(&pipeline.tasks, &pipeline.roles, inputs)
        .await
        .unwrap();

    let requests = backend.requests();
    assert!(requests[0].prompt.contains("You are Senior market researcher."));
    assert!(requests[0].prompt.contains("Find trends about crewflow"));
    assert!(requests[0].prompt.contains("Expected output: A list of trends"));
    assert!(requests[1]
        .prompt
        .contains("## research_task\ntrend one, trend two"));
    assert_eq!(ws.read("config/post.md"), "# Trends\n\nTwo of them.");
}

#[tokio::test]
async fn test_report_written_and_reloaded() {
    let ws = Workspace::new();
    let pipeline = Pipeline::load(&ws.write("tweets.yaml", TWEET_PIPELINE)).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply("T1", "Final Answer: a, b, c")
            .with_reply("T2", "Final Answer: tweet"),
    );

    let (report, error) = executor(&backend, CapabilityRegistry::new(), ws.settings())
        .run_report(&pipeline.name, &pipeline.tasks, &pipeline.roles, no_inputs())
        .await;
    assert!(error.is_none());
    assert!(report.succeeded());

    let path = ws.path().join("reports/run.json");
    report.write(&path).unwrap();
    let loaded = RunReport::load(&path).unwrap();

    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.pipeline, "tweets");
    assert_eq!(loaded.results.len(), 2);
    assert_eq!(loaded.result("T2").map(|r| r.output.as_str()), Some("tweet"));
    assert_eq!(
        loaded.result("T1").and_then(|r| r.artifact.clone()),
        Some(ws.path().join("keywords.txt"))
    );
}

#[tokio::test]
async fn test_scripted_backend_from_file() {
    let ws = Workspace::new();
    let pipeline = Pipeline::load(&ws.write("tweets.yaml", TWEET_PIPELINE)).unwrap();
    let script = ws.write(
        "script.yaml",
        r#"
T1:
  - "Final Answer: one, two, three"
T2:
  - "Final Answer: a tweet about one, two, three"
"#,
    );
    let backend = Arc::new(ScriptedBackend::load(&script).unwrap());

    let results = executor(&backend, CapabilityRegistry::new(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, no_inputs())
        .await
        .unwrap();

    assert_eq!(results[1].output, "a tweet about one, two, three");
    assert_eq!(results[1].instruction, "write a tweet using one, two, three");
}

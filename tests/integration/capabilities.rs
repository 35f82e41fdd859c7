//! Built-in file capabilities used from a run.

use std::sync::Arc;

use crewflow::orchestration::ScriptedBackend;
use crewflow::workflow::Pipeline;

use crate::fixtures::{executor, no_inputs, Workspace};

const NOTES_PIPELINE: &str = r#"
roles:
  - name: Archivist
    objective: Keep notes tidy
    persona: Methodical.
    capabilities: [write_file, read_file, list_directory]
tasks:
  - name: save
    role: Archivist
    instruction: save a note
"#;

#[tokio::test]
async fn test_write_then_read_in_workspace() {
    let ws = Workspace::new();
    let pipeline = Pipeline::load(&ws.write("notes.yaml", NOTES_PIPELINE)).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(
                "save",
                "Action: write_file\nAction Input: {\"path\": \"notes/today.md\", \"content\": \"buy milk\"}",
            )
            .with_reply(
                "save",
                "Action: read_file\nAction Input: {\"path\": \"notes/today.md\"}",
            )
            .with_reply("save", "Final Answer: saved"),
    );

    let results = executor(&backend, ws.builtin_capabilities(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, no_inputs())
        .await
        .unwrap();

    let invocations = &results[0].invocations;
    assert_eq!(invocations.len(), 2);
    assert_eq!(
        invocations[0].output.as_deref(),
        Some("Wrote 8 bytes to notes/today.md")
    );
    assert_eq!(invocations[1].output.as_deref(), Some("buy milk"));
    assert_eq!(ws.read("notes/today.md"), "buy milk");
    assert!(backend.requests()[2].prompt.contains("Observation: buy milk"));
}

#[tokio::test]
async fn test_path_outside_workspace_fed_back_as_error() {
    let ws = Workspace::new();
    let pipeline = Pipeline::load(&ws.write("notes.yaml", NOTES_PIPELINE)).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(
                "save",
                "Action: write_file\nAction Input: {\"path\": \"../escape.txt\", \"content\": \"x\"}",
            )
            .with_reply("save", "Final Answer: could not save"),
    );

    let results = executor(&backend, ws.builtin_capabilities(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, no_inputs())
        .await
        .unwrap();

    let invocation = &results[0].invocations[0];
    assert!(!invocation.is_success());
    assert!(invocation
        .error
        .as_deref()
        .unwrap()
        .contains("outside the workspace"));
    assert!(!ws.path().parent().unwrap().join("escape.txt").exists());
    assert_eq!(results[0].output, "could not save");
}

#[tokio::test]
async fn test_capability_not_granted_to_role() {
    let ws = Workspace::new();
    let path = ws.write(
        "plain.yaml",
        r#"
roles:
  - name: Writer
    objective: write
    persona: p
tasks:
  - name: draft
    role: Writer
    instruction: draft
"#,
    );
    let pipeline = Pipeline::load(&path).unwrap();
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_reply(
                "draft",
                "Action: list_directory\nAction Input: {}",
            )
            .with_reply("draft", "Final Answer: drafted"),
    );

    let results = executor(&backend, ws.builtin_capabilities(), ws.settings())
        .run(&pipeline.tasks, &pipeline.roles, no_inputs())
        .await
        .unwrap();

    let invocation = &results[0].invocations[0];
    assert!(!invocation.is_success());
    assert!(invocation.error.as_deref().unwrap().contains("list_directory"));
    assert_eq!(results[0].output, "drafted");
}

//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Writing pipeline files into a temporary directory
//! - Building executors around the scripted backend
//! - A capability that always fails

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tempfile::TempDir;

use crewflow::capability::{
    Capability, CapabilityRegistry, CapabilitySchema, CapabilitySettings, ParamKind, ParamSpec,
};
use crewflow::orchestration::{ExecutorSettings, PipelineExecutor, ScriptedBackend};
use crewflow::CapabilityError;

/// The two-task tweet pipeline: T2 uses T1's output.
pub const TWEET_PIPELINE: &str = r#"
name: tweets
roles:
  - name: Writer
    objective: Write short social posts
    persona: A punchy copywriter.
tasks:
  - name: T1
    role: Writer
    instruction: list 3 keywords
    output: keywords.txt
  - name: T2
    role: Writer
    instruction: write a tweet using {T1.output}
    depends_on: [T1]
    output: tweet.txt
"#;

/// A temporary directory holding pipeline files and artifacts.
pub struct Workspace {
    pub temp_dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file relative to the workspace and return its path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path().join(name)).expect("Failed to read file")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path().join(name).exists()
    }

    /// Executor settings writing artifacts into the workspace.
    pub fn settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            output_dir: self.path().to_path_buf(),
            ..Default::default()
        }
    }

    /// Built-in capabilities sandboxed to the workspace.
    pub fn builtin_capabilities(&self) -> CapabilityRegistry {
        let settings = CapabilitySettings {
            workspace: self.path().to_path_buf(),
            ..Default::default()
        };
        CapabilityRegistry::builtin(&settings).expect("Failed to build capabilities")
    }
}

/// A search capability whose backend is always down.
pub struct FlakySearch;

#[async_trait]
impl Capability for FlakySearch {
    fn schema(&self) -> CapabilitySchema {
        CapabilitySchema::new("flaky_search", "Search that always fails.")
            .param(ParamSpec::required("query", ParamKind::String, "search query"))
    }

    async fn invoke(&self, _input: &Map<String, Value>) -> Result<String, CapabilityError> {
        Err(CapabilityError::failed("flaky_search", "connection refused"))
    }
}

pub fn flaky_capabilities() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(FlakySearch));
    registry
}

pub fn executor(
    backend: &Arc<ScriptedBackend>,
    capabilities: CapabilityRegistry,
    settings: ExecutorSettings,
) -> PipelineExecutor {
    PipelineExecutor::new(backend.clone(), capabilities, settings)
}

pub fn no_inputs() -> HashMap<String, String> {
    HashMap::new()
}

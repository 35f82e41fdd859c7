//! Pipeline files.
//!
//! A pipeline file bundles roles, tasks, default inputs and per-pipeline
//! settings in one YAML or TOML document:
//!
//! ```yaml
//! name: marketing
//! process: sequential
//! inputs:
//!   product_name: crewflow
//! settings:
//!   max_capability_calls: 3
//!   output_dir: out
//! roles:
//!   - name: writer
//!     objective: Write about {product_name}
//!     persona: A concise technical writer.
//! tasks:
//!   - name: draft
//!     role: writer
//!     instruction: Draft a short post.
//!     output: post.md
//! ```
//!
//! Crew-style projects keep roles and tasks in separate files instead; see
//! [`Pipeline::load_split`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::core::role::{RoleDef, RoleRegistry};
use crate::core::source::{self, Entries};
use crate::core::task::{Process, TaskDef, TaskRegistry};
use crate::core::template::Template;
use crate::error::ConfigError;
use crate::Result;

/// Per-pipeline overrides of the user configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub max_capability_calls: Option<usize>,
    #[serde(default)]
    pub abort_on_capability_error: Option<bool>,
    /// Relative to the pipeline file's directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,    /// Backend requests per minute across all roles.
    #[serde(default)]
    pub max_rpm: Option<u32>,
}

/// A pipeline file as written.
#[derive(Debug, Default, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub process: Process,
    #[serde(default)]
    pub settings: PipelineSettings,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub roles: Entries<RoleDef>,
    #[serde(default)]
    pub tasks: Entries<TaskDef>,
}

/// A loaded, validated pipeline.
#[derive(Debug)]
pub struct Pipeline {
    pub name: String,
    pub roles: RoleRegistry,
    pub tasks: TaskRegistry,
    /// Default run inputs; command-line inputs take precedence.
    pub inputs: BTreeMap<String, String>,
    pub settings: PipelineSettings,
    /// Directory the definition was read from.
    pub base_dir: PathBuf,
}

impl Pipeline {
    /// Load a single-file pipeline.
    pub fn load(path: &Path) -> Result<Self> {
        let file: PipelineFile = source::read(path)?;
        let mut pipeline = Self::from_file(file, &file_stem(path))?;
        pipeline.base_dir = parent_dir(path);
        tracing::info!(
            pipeline = %pipeline.name,
            roles = pipeline.roles.len(),
            tasks = pipeline.tasks.len(),
            "pipeline loaded"
        );
        Ok(pipeline)
    }

    /// Load a pipeline from separate role and task files.
    ///
    /// The task file may set `process` when written in the wrapped
    /// `tasks:` form; otherwise dependency order is used.
    pub fn load_split(roles_path: &Path, tasks_path: &Path) -> Result<Self> {
        let roles = RoleRegistry::load(roles_path)?;
        let tasks = TaskRegistry::load(tasks_path, &roles)?;
        Ok(Self {
            name: file_stem(tasks_path),
            roles,
            tasks,
            inputs: BTreeMap::new(),
            settings: PipelineSettings::default(),
            base_dir: parent_dir(tasks_path),
        })
    }

    /// Validate a parsed pipeline file.
    pub fn from_file(file: PipelineFile, default_name: &str) -> std::result::Result<Self, ConfigError> {
        let roles = RoleRegistry::from_defs(file.roles.into_inner())?;
        let tasks = TaskRegistry::from_defs(file.tasks.into_inner(), &roles, file.process)?;
        Ok(Self {
            name: file
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_name.to_string()),
            roles,
            tasks,
            inputs: file.inputs,
            settings: file.settings,
            base_dir: PathBuf::from("."),
        })
    }

    /// Pipeline defaults overlaid with `overrides`.
    pub fn run_inputs(&self, overrides: &[(String, String)]) -> HashMap<String, String> {
        let mut inputs: HashMap<String, String> = self
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in overrides {
            inputs.insert(key.clone(), value.clone());
        }
        inputs
    }

    /// Run inputs referenced anywhere a prompt is built from but given no
    /// value: task instructions and expected outputs, and role titles,
    /// personas and objectives.
    pub fn missing_inputs(&self, inputs: &HashMap<String, String>) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        for task in self.tasks.tasks() {
            refs.extend(task.instruction.input_refs());
            if let Some(expected) = &task.expected_output {
                refs.extend(Template::new(expected).input_refs());
            }
        }
        for role in self.roles.iter() {
            for text in [role.display_title(), role.persona.as_str(), role.objective.as_str()] {
                refs.extend(Template::new(text).input_refs());
            }
        }

        let mut missing: Vec<String> = Vec::new();
        for name in refs {
            if !inputs.contains_key(&name) && !missing.contains(&name) {
                missing.push(name);
            }
        }
        missing
    }

    /// Output directory from the pipeline settings, if any.
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.settings.output_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.base_dir.join(dir)
            }
        })
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("pipeline")
        .to_string()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

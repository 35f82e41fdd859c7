//! Task data model and the task registry.
//!
//! Tasks are the units of work assigned to roles. Each task names its role,
//! an instruction template, the tasks whose output it needs, and where its
//! result is written. The registry validates every reference and resolves
//! the execution order before anything runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

use crate::capability::{ParamKind, ParamSpec};
use crate::core::dag::{DependencyType, TaskDAG};
use crate::core::role::RoleRegistry;
use crate::core::source::{non_blank, Document, Entries, Named};
use crate::core::template::Template;
use crate::error::ConfigError;
use crate::Result;

/// How the execution order is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Process {
    /// Configuration order. Dependencies must point backwards, and a task
    /// without dependencies sees the previous task's output as context.
    Sequential,
    /// Topological order over declared and referenced dependencies.
    #[default]
    Dependency,
}

impl std::fmt::Display for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Process::Sequential => write!(f, "sequential"),
            Process::Dependency => write!(f, "dependency"),
        }
    }
}

/// Expected shape of a task's final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Markdown,
    /// The answer must parse as JSON.
    Json,
}

/// Keys a JSON final answer must carry, with their types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSchema {
    fields: Vec<ParamSpec>,
}

impl OutputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, kind: ParamKind) -> Self {
        self.fields.push(ParamSpec::required(name, kind, ""));
        self
    }

    pub fn fields(&self) -> &[ParamSpec] {
        &self.fields
    }

    /// Check a parsed answer. The error names the first missing or
    /// mistyped key.
    pub fn check(&self, answer: &Value) -> std::result::Result<(), String> {
        let object = answer
            .as_object()
            .ok_or_else(|| "answer must be a JSON object".to_string())?;
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    return Err(format!("answer is missing required key '{}'", field.name));
                }
                Some(value) if !field.kind.accepts(value) => {
                    return Err(format!("key '{}' must be a {}", field.name, field.kind));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// `"topic" (string), "tags" (list of strings)`
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("\"{}\" ({})", f.name, f.kind))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A task as written in configuration.
///
/// Crew-style aliases: `description` for the instruction, `agent` for the
/// role, `context` for dependencies, `output_file` for the artifact path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "description")]
    pub instruction: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default, alias = "agent")]
    pub role: Option<String>,
    #[serde(default, alias = "context")]
    pub depends_on: Vec<String>,
    #[serde(default, alias = "output_file")]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Required answer keys and their types; implies JSON output.
    #[serde(default, alias = "output_json")]
    pub output_schema: BTreeMap<String, ParamKind>,
    #[serde(default)]
    pub optional: bool,
}

impl Named for TaskDef {
    fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }
}

impl TaskDef {
    pub fn new(name: &str, role: &str, instruction: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            instruction: Some(instruction.to_string()),
            role: Some(role.to_string()),
            ..Default::default()
        }
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.depends_on.push(dependency.to_string());
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn expected_output(mut self, expected: &str) -> Self {
        self.expected_output = Some(expected.to_string());
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn output_field(mut self, name: &str, kind: ParamKind) -> Self {
        self.output_schema.insert(name.to_string(), kind);
        self
    }
}

/// A loaded task. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub instruction: Template,
    pub expected_output: Option<String>,
    /// Name of the assigned role, checked against the role registry.
    pub role: String,
    /// Declared dependencies followed by tasks referenced only through
    /// placeholders.
    pub depends_on: Vec<String>,
    pub output: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub output_schema: Option<OutputSchema>,
    /// A failure is recorded instead of aborting the run.
    pub optional: bool,
}

impl Task {
    fn from_def(def: TaskDef, position: usize) -> std::result::Result<Self, ConfigError> {
        let name = non_blank(def.name).ok_or_else(|| ConfigError::MissingField {
            kind: "task",
            entry: format!("#{}", position + 1),
            field: "name",
        })?;
        let instruction = non_blank(def.instruction).ok_or_else(|| ConfigError::MissingField {
            kind: "task",
            entry: name.clone(),
            field: "instruction",
        })?;
        let role = non_blank(def.role).ok_or_else(|| ConfigError::MissingField {
            kind: "task",
            entry: name.clone(),
            field: "role",
        })?;

        let instruction = Template::new(&instruction);
        let mut depends_on: Vec<String> = Vec::new();
        for dep in def.depends_on.into_iter().chain(instruction.output_refs()) {
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }

        let output_schema = (!def.output_schema.is_empty()).then(|| {
            def.output_schema
                .iter()
                .fold(OutputSchema::new(), |schema, (key, kind)| schema.field(key, *kind))
        });
        let output_format = match output_schema {
            Some(_) => OutputFormat::Json,
            None => def.output_format,
        };

        Ok(Self {
            name,
            instruction,
            expected_output: non_blank(def.expected_output),
            role,
            depends_on,
            output: def.output,
            output_format,
            output_schema,
            optional: def.optional,
        })
    }
}

/// A tasks file with the definitions under a `tasks` key.
#[derive(Deserialize)]
struct TaskFile {
    #[serde(default)]
    process: Process,
    tasks: Entries<TaskDef>,
}

/// Validated tasks in configuration order, plus their execution order.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
    dag: TaskDAG,
    order: Vec<usize>,
    process: Process,
}

impl TaskRegistry {
    /// Load tasks from a YAML or TOML file, checking them against `roles`.
    pub fn load(path: &Path, roles: &RoleRegistry) -> Result<Self> {
        let doc = Document::read(path)?;
        let (process, defs) = if doc.has_key("tasks") {
            let file: TaskFile = doc.parse()?;
            (file.process, file.tasks)
        } else {
            (Process::default(), doc.parse::<Entries<TaskDef>>()?)
        };
        Ok(Self::from_defs(defs.into_inner(), roles, process)?)
    }

    /// Build the registry from parsed definitions.
    ///
    /// # Errors
    /// Any `ConfigError` describing a missing field, a duplicate name, an
    /// undefined role/dependency/placeholder, a reused output path, a
    /// forward dependency in a sequential pipeline, or a dependency cycle.
    pub fn from_defs(
        defs: Vec<TaskDef>,
        roles: &RoleRegistry,
        process: Process,
    ) -> std::result::Result<Self, ConfigError> {
        let mut tasks: Vec<Task> = Vec::with_capacity(defs.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for (position, def) in defs.into_iter().enumerate() {
            let task = Task::from_def(def, position)?;
            if index.contains_key(&task.name) {
                return Err(ConfigError::DuplicateTask(task.name));
            }
            if !roles.contains(&task.role) {
                return Err(ConfigError::UnknownRole {
                    task: task.name,
                    role: task.role,
                });
            }
            index.insert(task.name.clone(), position);
            tasks.push(task);
        }

        let mut dag = TaskDAG::new();
        for task in &tasks {
            dag.add_task(&task.name);
        }

        let mut outputs: HashMap<PathBuf, &str> = HashMap::new();
        let mut forward: Option<ConfigError> = None;
        for (position, task) in tasks.iter().enumerate() {
            let referenced = task.instruction.output_refs();
            for dep in &task.depends_on {
                let Some(&dep_position) = index.get(dep) else {
                    return Err(if referenced.contains(dep) {
                        ConfigError::UnknownPlaceholder {
                            task: task.name.clone(),
                            reference: dep.clone(),
                        }
                    } else {
                        ConfigError::UnknownDependency {
                            task: task.name.clone(),
                            dependency: dep.clone(),
                        }
                    });
                };
                if process == Process::Sequential && dep_position > position && forward.is_none() {
                    forward = Some(ConfigError::ForwardDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                let dep_type = if referenced.contains(dep) {
                    DependencyType::Reference
                } else {
                    DependencyType::Declared
                };
                dag.add_dependency(dep, &task.name, dep_type)?;
            }

            if let Some(path) = task.output.as_deref() {
                if let Some(first) = outputs.insert(normalize_path(path), &task.name) {
                    return Err(ConfigError::DuplicateOutput {
                        path: path.to_path_buf(),
                        first: first.to_string(),
                        second: task.name.clone(),
                    });
                }
            }
        }

        // Cycles are reported ahead of forward dependencies.
        let topo: Vec<usize> = dag
            .topological_order()?
            .into_iter()
            .map(|name| index[name])
            .collect();
        if let Some(err) = forward {
            return Err(err);
        }
        let order = match process {
            Process::Sequential => (0..tasks.len()).collect(),
            Process::Dependency => topo,
        };

        tracing::debug!(
            tasks = tasks.len(),
            dependencies = dag.dependency_count(),
            %process,
            "task registry loaded"
        );

        Ok(Self {
            tasks,
            index,
            dag,
            order,
            process,
        })
    }

    /// Tasks in configuration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// Tasks in the order they will execute.
    pub fn execution_order(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().map(|&i| &self.tasks[i])
    }

    /// The task that precedes `name` in execution order.
    pub fn previous(&self, name: &str) -> Option<&Task> {
        let position = self.order.iter().position(|&i| self.tasks[i].name == name)?;
        position
            .checked_sub(1)
            .map(|p| &self.tasks[self.order[p]])
    }

    pub fn dag(&self) -> &TaskDAG {
        &self.dag
    }

    pub fn process(&self) -> Process {
        self.process
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Lexically normalise an output path so `./out/a.md` and `out/a.md` compare equal.
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                } else {
                    normalized.push("..");
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

//! Core domain models for crewflow pipelines.
//!
//! Roles, tasks, instruction templates and the task dependency DAG, plus
//! the shared reader for YAML/TOML definition files.

pub mod dag;
pub mod role;
pub mod source;
pub mod task;
pub mod template;

pub use dag::{DependencyType, TaskDAG};
pub use role::{Role, RoleDef, RoleRegistry};
pub use source::ConfigFormat;
pub use task::{OutputFormat, OutputSchema, Process, Task, TaskDef, TaskRegistry};
pub use template::Template;

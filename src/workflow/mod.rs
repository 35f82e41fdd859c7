//! Pipeline definitions and run records.

mod definition;
mod types;

pub use definition::{Pipeline, PipelineFile, PipelineSettings};
pub use types::{CapabilityInvocation, ExecutionResult, RunId, RunReport, TaskOutcome};

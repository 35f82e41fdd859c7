//! Orchestration layer: generation backends and the pipeline executor.
//!
//! The executor drives each task through a plan-act loop against a
//! `GenerationBackend`: either the headless CLI backend or a scripted
//! backend replaying canned replies. Backend calls can be held to a
//! requests-per-minute limit per role and per pipeline.

pub mod backend;
mod executor;
mod headless;
mod rate_limit;
mod scripted;

pub use backend::{GenerationBackend, GenerationRequest, Step};
pub use executor::{
    ExecutorEvent, ExecutorSettings, PipelineExecutor, RunContext, DEFAULT_MAX_CAPABILITY_CALLS,
};
pub use headless::{HeadlessBackend, HeadlessResponse, ResultType, DEFAULT_TIMEOUT_SECS};
pub use rate_limit::{RateLimiter, PIPELINE_SCOPE, RATE_WINDOW};
pub use scripted::{ScriptedBackend, ScriptedReply};

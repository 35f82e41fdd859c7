//! Integration test suite for crewflow.
//!
//! These tests load pipelines from files on disk and run them end to end
//! against the scripted backend, so no network or backend binary is needed.
//!
//! # Test Categories
//!
//! - `pipeline_e2e`: loading, ordering, execution and artifacts
//! - `failures`: configuration errors and run-time failure handling
//! - `capabilities`: built-in file capabilities driven through a run

mod fixtures;

mod capabilities;
mod failures;
mod pipeline_e2e;

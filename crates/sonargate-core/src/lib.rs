pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod orchestrate;
pub mod poll;
pub mod render;
pub mod report;
pub mod scan;

pub use error::{RunError, Stage};
pub use orchestrate::{Orchestrator, RunOutcome, run};

pub const TOOL_NAME: &str = "sonargate";

/// JSON schema version of run reports.
/// Bump only when a report field changes meaning or disappears.
pub const SCHEMA_VERSION: &str = "0.1.0";

//! Typed run failures.
//!
//! Every failure a run can produce is a variant of [`RunError`]. Each variant
//! knows the [`Stage`] it originated from so the caller can report message
//! and stage together. Library code never terminates the process; the binary
//! maps any `RunError` to a non-zero exit.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::poll::JobStatus;

/// Orchestration stage a run was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Render,
    Scan,
    Poll,
    Gate,
    Verdict,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Render => "render",
            Stage::Scan => "scan",
            Stage::Poll => "poll",
            Stage::Gate => "gate",
            Stage::Verdict => "verdict",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to render scanner properties: {0}")]
    ConfigRender(String),

    #[error("scanner execution failed: {0}")]
    ScanExecution(String),

    #[error("no job status url (.../api/ce/task?id=...) found in scanner output")]
    JobHandleNotFound,

    #[error("job status request failed: {0}")]
    PollTransport(#[source] reqwest::Error),

    #[error("job status response is not valid json: {0}")]
    PollParse(#[source] serde_json::Error),

    #[error("analysis job did not finish within {timeout:?} ({ticks} ticks)")]
    PollTimeout { timeout: Duration, ticks: u32 },

    #[error("analysis job ended with status {0}")]
    PollTerminalFailure(JobStatus),

    #[error("quality gate request failed: {0}")]
    GateFetch(#[source] reqwest::Error),

    #[error("quality gate response is not valid json: {0}")]
    GateParse(#[source] serde_json::Error),

    #[error("quality gate status {actual} does not match expected {expected}")]
    QualityGateFailed { actual: String, expected: String },

    #[error("run cancelled during {0} stage")]
    Cancelled(Stage),
}

impl RunError {
    /// Stage the failure originated from.
    pub fn stage(&self) -> Stage {
        match self {
            RunError::InvalidConfig(_) => Stage::Config,
            RunError::ConfigRender(_) => Stage::Render,
            RunError::ScanExecution(_) | RunError::JobHandleNotFound => Stage::Scan,
            RunError::PollTransport(_)
            | RunError::PollParse(_)
            | RunError::PollTimeout { .. }
            | RunError::PollTerminalFailure(_) => Stage::Poll,
            RunError::GateFetch(_) | RunError::GateParse(_) => Stage::Gate,
            RunError::QualityGateFailed { .. } => Stage::Verdict,
            RunError::Cancelled(stage) => *stage,
        }
    }

    /// Process exit code for this failure. Every failure maps to 1.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type Result<T, E = RunError> = std::result::Result<T, E>;

//! External scanner invocation and job handle extraction.
//!
//! The scanner is run exactly once, to completion, before polling starts.
//! Its output announces the server-side analysis task with a line such as:
//!
//! ```text
//! INFO: More about the report processing at https://sonar.example/api/ce/task?id=AYx1
//! ```
//!
//! The first such URL is the run's [`JobHandle`]. If the output mentions
//! several analyses only the first is followed; this is a known limitation.

use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::config::ScannerCommand;
use crate::error::{Result, RunError, Stage};

static TASK_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s/]+(?:/[^\s]*)?/api/ce/task\?id=[^\s]+").expect("task url regex")
});

/// URL identifying the asynchronous analysis task on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captured scanner output.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ScanOutput {
    /// First job handle in stdout, then in stderr.
    pub fn job_handle(&self) -> Option<JobHandle> {
        extract_job_handle(&self.stdout).or_else(|| extract_job_handle(&self.stderr))
    }
}

/// Find the first `.../api/ce/task?id=...` URL in `text`.
pub fn extract_job_handle(text: &str) -> Option<JobHandle> {
    TASK_URL.find(text).map(|m| JobHandle::new(m.as_str()))
}

/// Run the scanner and return the job handle it announced.
///
/// Stdout is echoed to stderr so the operator sees scanner progress without
/// mixing it into the run report. A cancelled run kills the scanner.
pub async fn launch_scan(command: &ScannerCommand, cancel: &CancellationToken) -> Result<JobHandle> {
    let output = run_scanner(command, cancel).await?;

    let handle = output.job_handle().ok_or(RunError::JobHandleNotFound)?;
    tracing::info!(job_url = %handle, "analysis task submitted");
    Ok(handle)
}

async fn run_scanner(command: &ScannerCommand, cancel: &CancellationToken) -> Result<ScanOutput> {
    tracing::info!(program = %command.program, args = ?command.args, "starting scanner");

    let child = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RunError::ScanExecution(format!("failed to start {}: {e}", command.program)))?;

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(RunError::Cancelled(Stage::Scan)),
        out = child.wait_with_output() => out
            .map_err(|e| RunError::ScanExecution(format!("failed to wait for {}: {e}", command.program)))?,
    };

    let captured = ScanOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !captured.stdout.is_empty() {
        eprint!("{}", captured.stdout);
    }

    if !output.status.success() {
        if !captured.stderr.is_empty() {
            eprint!("{}", captured.stderr);
        }
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(RunError::ScanExecution(format!(
            "{} exited with {code}",
            command.program
        )));
    }

    tracing::debug!(
        stdout_bytes = captured.stdout.len(),
        stderr_bytes = captured.stderr.len(),
        "scanner finished"
    );
    Ok(captured)
}

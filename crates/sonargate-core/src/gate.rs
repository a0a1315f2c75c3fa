//! Quality gate retrieval and verdict.
//!
//! The server answers `api/qualitygates/project_status` with an overall
//! status and the per-metric conditions behind it. Only the overall status
//! decides the verdict; conditions are logged and reported for diagnosis.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RunError, Stage};

pub const GATE_STATUS_PATH: &str = "/api/qualitygates/project_status";

/// One metric condition of the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub status: String,
    pub metric_key: String,
    #[serde(default)]
    pub comparator: Option<String>,
    #[serde(default)]
    pub period_index: Option<i64>,
    #[serde(default)]
    pub error_threshold: Option<String>,
    #[serde(default)]
    pub actual_value: Option<String>,
}

impl Condition {
    pub fn passed(&self) -> bool {
        self.status.eq_ignore_ascii_case("OK")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub parameter: Option<String>,
}

/// Parsed `projectStatus` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGateResult {
    pub status: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub periods: Vec<Period>,
    #[serde(default)]
    pub ignored_conditions: bool,
}

impl QualityGateResult {
    pub fn failed_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.iter().filter(|c| !c.passed())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateResponse {
    project_status: QualityGateResult,
}

/// Parse a `{"projectStatus": {...}}` body.
pub fn parse_gate_response(body: &[u8]) -> Result<QualityGateResult> {
    serde_json::from_slice::<GateResponse>(body)
        .map(|r| r.project_status)
        .map_err(RunError::GateParse)
}

/// Source of quality gate results, one request per call.
pub trait GateSource {
    fn fetch_gate(&self, project_key: &str) -> impl Future<Output = Result<QualityGateResult>> + Send;
}

/// Fetch the gate for `project_key`, logging every condition.
pub async fn fetch_gate_status<S: GateSource>(
    source: &S,
    project_key: &str,
    cancel: &CancellationToken,
) -> Result<QualityGateResult> {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(RunError::Cancelled(Stage::Gate)),
        res = source.fetch_gate(project_key) => res?,
    };

    tracing::info!(
        project_key,
        status = %result.status,
        conditions = result.conditions.len(),
        ignored_conditions = result.ignored_conditions,
        "quality gate fetched"
    );
    for c in &result.conditions {
        tracing::debug!(
            metric = %c.metric_key,
            status = %c.status,
            comparator = c.comparator.as_deref().unwrap_or(""),
            threshold = c.error_threshold.as_deref().unwrap_or(""),
            actual = c.actual_value.as_deref().unwrap_or(""),
            "quality gate condition"
        );
    }

    Ok(result)
}

/// Pass/fail rule for the overall gate status.
///
/// A gate passes when its status equals the expected status. Comparison
/// ignores surrounding whitespace and ASCII case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    pub expected: String,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            expected: crate::config::DEFAULT_QUALITY.to_string(),
        }
    }
}

impl GatePolicy {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    pub fn passes(&self, status: &str) -> bool {
        status.trim().eq_ignore_ascii_case(self.expected.trim())
    }

    /// `Ok` when the result passes, `QualityGateFailed` otherwise.
    pub fn check(&self, result: &QualityGateResult) -> Result<()> {
        if self.passes(&result.status) {
            return Ok(());
        }
        Err(RunError::QualityGateFailed {
            actual: result.status.clone(),
            expected: self.expected.clone(),
        })
    }
}

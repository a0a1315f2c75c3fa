use serde::Serialize;

use crate::config::ConfigSummary;
use crate::error::{RunError, Stage};
use crate::gate::{Condition, QualityGateResult};
use crate::orchestrate::RunOutcome;
use crate::poll::JobStatus;
use crate::{SCHEMA_VERSION, TOOL_NAME};

/// Top-level run report.
///
/// Printed once at the end of every run, passed or failed. Field names are
/// a stable JSON contract for pipelines that archive the report.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: String,
    pub tool: ToolInfo,
    pub project: ConfigSummary,
    pub job: JobInfo,
    pub gate: Option<GateInfo>,
    pub verdict: VerdictInfo,
}

impl RunReport {
    /// Assemble the report from whatever the run got through.
    pub fn new(
        tool: ToolInfo,
        project: ConfigSummary,
        outcome: &RunOutcome,
        result: &Result<(), RunError>,
    ) -> Self {
        let job = JobInfo {
            url: outcome.job.as_ref().map(|j| j.to_string()),
            task_id: outcome.task.as_ref().and_then(|t| t.id.clone()),
            status: outcome.task.as_ref().map(|t| t.status.clone()),
            ticks: outcome.ticks,
        };

        let verdict = match result {
            Ok(()) => VerdictInfo::passed(),
            Err(err) => VerdictInfo::failed(err),
        };

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            tool,
            project,
            job,
            gate: outcome.gate.as_ref().map(GateInfo::from),
            verdict,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct JobInfo {
    pub url: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<JobStatus>,
    pub ticks: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateInfo {
    pub status: String,
    pub ignored_conditions: bool,
    pub conditions: Vec<Condition>,
}

impl From<&QualityGateResult> for GateInfo {
    fn from(gate: &QualityGateResult) -> Self {
        Self {
            status: gate.status.clone(),
            ignored_conditions: gate.ignored_conditions,
            conditions: gate.conditions.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictLevel {
    Passed,
    Failed,
}

impl std::fmt::Display for VerdictLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerdictLevel::Passed => f.write_str("PASSED"),
            VerdictLevel::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerdictInfo {
    pub level: VerdictLevel,
    /// Stage that failed; `None` when passed.
    pub stage: Option<Stage>,
    pub reason: String,
    pub exit_code: i32,
}

impl VerdictInfo {
    pub fn passed() -> Self {
        Self {
            level: VerdictLevel::Passed,
            stage: None,
            reason: "quality gate passed".into(),
            exit_code: 0,
        }
    }

    pub fn failed(err: &RunError) -> Self {
        Self {
            level: VerdictLevel::Failed,
            stage: Some(err.stage()),
            reason: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}

pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} {}\n", TOOL_NAME, report.tool.version));
    out.push_str(&format!("Project: {}\n", report.project.project_key));
    if let Some(url) = &report.job.url {
        out.push_str(&format!("Job: {url}\n"));
    }
    if let Some(status) = &report.job.status {
        out.push_str(&format!("Job status: {status} ({} ticks)\n", report.job.ticks));
    }
    if let Some(gate) = &report.gate {
        out.push_str(&format!("Quality gate: {}\n", gate.status));
        for c in &gate.conditions {
            out.push_str(&format!(
                "  - {} [{}] actual={} threshold={} {}\n",
                c.metric_key,
                c.status,
                c.actual_value.as_deref().unwrap_or("-"),
                c.error_threshold.as_deref().unwrap_or("-"),
                c.comparator.as_deref().unwrap_or(""),
            ));
        }
    }
    match report.verdict.stage {
        Some(stage) => out.push_str(&format!(
            "Verdict: {} at {stage}: {}\n",
            report.verdict.level, report.verdict.reason
        )),
        None => out.push_str(&format!("Verdict: {}\n", report.verdict.level)),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::TaskInfo;
    use crate::scan::JobHandle;

    fn tool() -> ToolInfo {
        ToolInfo {
            name: "sonargate".into(),
            version: "0.1.0-test".into(),
        }
    }

    fn project() -> ConfigSummary {
        ConfigSummary {
            host: "http://sonar.local".into(),
            project_key: "org:repo:main".into(),
            expected_quality: "OK".into(),
            has_token: false,
        }
    }

    fn finished_outcome(status: &str) -> RunOutcome {
        RunOutcome {
            job: Some(JobHandle::new("http://sonar.local/api/ce/task?id=7")),
            task: Some(TaskInfo {
                id: Some("7".into()),
                status: JobStatus::Success,
                ..Default::default()
            }),
            ticks: 3,
            gate: Some(QualityGateResult {
                status: status.into(),
                conditions: vec![Condition {
                    status: status.into(),
                    metric_key: "new_coverage".into(),
                    comparator: Some("LT".into()),
                    error_threshold: Some("80".into()),
                    actual_value: Some("91.0".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    #[test]
    fn passed_report_exits_zero() {
        let report = RunReport::new(tool(), project(), &finished_outcome("OK"), &Ok(()));

        assert_eq!(report.verdict.level, VerdictLevel::Passed);
        assert_eq!(report.exit_code(), 0);
        assert!(report.verdict.stage.is_none());
        assert_eq!(report.job.task_id.as_deref(), Some("7"));
        assert_eq!(report.job.ticks, 3);
    }

    #[test]
    fn failed_report_carries_stage_and_reason() {
        let err = RunError::QualityGateFailed {
            actual: "ERROR".into(),
            expected: "OK".into(),
        };
        let report = RunReport::new(tool(), project(), &finished_outcome("ERROR"), &Err(err));

        assert_eq!(report.verdict.level, VerdictLevel::Failed);
        assert_eq!(report.verdict.stage, Some(Stage::Verdict));
        assert_eq!(report.exit_code(), 1);
        assert!(report.verdict.reason.contains("ERROR"));
    }

    #[test]
    fn early_failure_has_no_job_or_gate() {
        let report = RunReport::new(
            tool(),
            project(),
            &RunOutcome::default(),
            &Err(RunError::JobHandleNotFound),
        );

        assert!(report.job.url.is_none());
        assert!(report.gate.is_none());
        assert_eq!(report.verdict.stage, Some(Stage::Scan));
    }

    #[test]
    fn json_shape_is_stable() {
        let report = RunReport::new(tool(), project(), &finished_outcome("OK"), &Ok(()));
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["schema_version"], SCHEMA_VERSION);
        assert_eq!(json["project"]["project_key"], "org:repo:main");
        assert_eq!(json["job"]["status"], "SUCCESS");
        assert_eq!(json["gate"]["conditions"][0]["metricKey"], "new_coverage");
        assert_eq!(json["verdict"]["level"], "PASSED");
        assert!(json["verdict"]["stage"].is_null());
    }

    #[test]
    fn text_lists_conditions_and_verdict() {
        let err = RunError::QualityGateFailed {
            actual: "ERROR".into(),
            expected: "OK".into(),
        };
        let text = render_text(&RunReport::new(
            tool(),
            project(),
            &finished_outcome("ERROR"),
            &Err(err),
        ));

        assert!(text.contains("Project: org:repo:main"));
        assert!(text.contains("Quality gate: ERROR"));
        assert!(text.contains("new_coverage [ERROR] actual=91.0 threshold=80 LT"));
        assert!(text.contains("Verdict: FAILED at verdict"));
    }
}

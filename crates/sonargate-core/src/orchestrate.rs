//! Run sequencing.
//!
//! A run is strictly linear: validate config, render scanner properties,
//! launch the scan, await the analysis task, fetch the quality gate, decide.
//! The first failing stage ends the run. Nothing is retried across stages.

use tokio_util::sync::CancellationToken;

use crate::client::SonarClient;
use crate::config::RunConfig;
use crate::error::{Result, RunError, Stage};
use crate::gate::{self, GatePolicy, GateSource, QualityGateResult};
use crate::poll::{self, TaskInfo, TaskSource};
use crate::render;
use crate::report::{RunReport, ToolInfo};
use crate::scan::{self, JobHandle};

/// What a run produced, stage by stage.
///
/// Fields stay `None` for stages the run never reached.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub job: Option<JobHandle>,
    pub task: Option<TaskInfo>,
    pub ticks: u32,
    pub gate: Option<QualityGateResult>,
}

pub struct Orchestrator<'a, A> {
    config: &'a RunConfig,
    api: &'a A,
    policy: GatePolicy,
}

impl<'a, A> Orchestrator<'a, A>
where
    A: TaskSource + GateSource,
{
    pub fn new(config: &'a RunConfig, api: &'a A) -> Self {
        Self {
            config,
            api,
            policy: GatePolicy::new(config.quality.clone()),
        }
    }

    /// Run every stage; the outcome is returned only when the gate passes.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();
        self.run_into(&mut outcome, cancel).await?;
        Ok(outcome)
    }

    /// Run every stage, recording progress into `outcome` as stages finish.
    pub async fn run_into(&self, outcome: &mut RunOutcome, cancel: &CancellationToken) -> Result<()> {
        let config = self.config;
        config.validate()?;

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled(Stage::Render));
        }
        render::write_properties(config).await?;

        let job = scan::launch_scan(&config.scanner, cancel).await?;
        outcome.job = Some(job.clone());

        let polled = poll::await_completion(self.api, &job, config.poll, cancel).await?;
        outcome.ticks = polled.ticks;
        outcome.task = Some(polled.task);

        let project_key = config.project_key();
        let gate = gate::fetch_gate_status(self.api, &project_key, cancel).await?;
        let verdict = self.policy.check(&gate);
        outcome.gate = Some(gate);

        match &verdict {
            Ok(()) => tracing::info!(%project_key, expected = %self.policy.expected, "quality gate passed"),
            Err(err) => tracing::error!(%project_key, error = %err, "quality gate failed"),
        }
        verdict
    }

    /// Run every stage and fold the result into a report.
    pub async fn report(&self, tool: ToolInfo, cancel: &CancellationToken) -> RunReport {
        let mut outcome = RunOutcome::default();
        let result = self.run_into(&mut outcome, cancel).await;
        if let Err(err) = &result {
            tracing::error!(stage = %err.stage(), error = %err, "run failed");
        }
        RunReport::new(tool, self.config.summary(), &outcome, &result)
    }
}

/// Run against the server named in `config`.
pub async fn run(config: &RunConfig, cancel: &CancellationToken) -> Result<RunOutcome> {
    let client = SonarClient::from_config(config)?;
    Orchestrator::new(config, &client).run(cancel).await
}

//! Waiting for the server-side analysis task.
//!
//! The poller requests the task status once per interval until the task
//! reaches a terminal status or the deadline fires, whichever comes first.
//! The deadline also bounds a request that is still in flight, so a stalled
//! call cannot stretch the wait past the configured timeout.
//!
//! State machine:
//!
//!   Waiting --SUCCESS-----------> Succeeded
//!   Waiting --FAILED|CANCELED---> Failed
//!   Waiting --other status------> Waiting
//!   Waiting --deadline----------> TimedOut
//!
//! Terminal states absorb every further event.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PollSettings;
use crate::error::{Result, RunError, Stage};
use crate::scan::JobHandle;

/// Task status reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Success,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
            JobStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// The `task` object of a job status response.
///
/// Only `status` is required; the rest is kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub component_key: Option<String>,
    #[serde(default)]
    pub analysis_id: Option<String>,
    pub status: JobStatus,
    #[serde(default)]
    pub submitted_at: Option<String>,
    #[serde(default)]
    pub executed_at: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    task: TaskInfo,
}

/// Parse a `{"task": {...}}` body.
pub fn parse_task_response(body: &[u8]) -> Result<TaskInfo> {
    serde_json::from_slice::<TaskResponse>(body)
        .map(|r| r.task)
        .map_err(RunError::PollParse)
}

/// Source of task status, one request per call.
pub trait TaskSource {
    fn fetch_task(&self, handle: &JobHandle) -> impl Future<Output = Result<TaskInfo>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Waiting,
    Succeeded,
    Failed(JobStatus),
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Waiting)
    }

    /// Transition on an observed task status.
    pub fn observe(self, status: &JobStatus) -> PollState {
        match self {
            PollState::Waiting => match status {
                JobStatus::Success => PollState::Succeeded,
                JobStatus::Failed | JobStatus::Canceled => PollState::Failed(status.clone()),
                _ => PollState::Waiting,
            },
            terminal => terminal,
        }
    }

    /// Transition when the deadline fires.
    pub fn expire(self) -> PollState {
        match self {
            PollState::Waiting => PollState::TimedOut,
            terminal => terminal,
        }
    }
}

/// Result of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub task: TaskInfo,
    pub ticks: u32,
}

/// Poll `handle` until the task succeeds.
///
/// The first request goes out one interval after the call. Fails with
/// `PollTerminalFailure` on FAILED or CANCELED, `PollTimeout` when the
/// deadline fires first, and immediately on any transport or parse error.
pub async fn await_completion<S: TaskSource>(
    source: &S,
    handle: &JobHandle,
    settings: PollSettings,
    cancel: &CancellationToken,
) -> Result<PollOutcome> {
    if settings.interval.is_zero() {
        return Err(RunError::InvalidConfig("poll interval must be > 0".into()));
    }

    let start = Instant::now();
    let deadline = tokio::time::sleep_until(start + settings.timeout);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval_at(start + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut state = PollState::Waiting;
    let mut last = TaskInfo::default();
    let mut ticks: u32 = 0;

    while !state.is_terminal() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled(Stage::Poll)),
            _ = &mut deadline => {
                state = state.expire();
                continue;
            }
            _ = ticker.tick() => {}
        }

        ticks += 1;
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled(Stage::Poll)),
            _ = &mut deadline => {
                state = state.expire();
                continue;
            }
            res = source.fetch_task(handle) => res?,
        };

        tracing::debug!(tick = ticks, status = %task.status, "job status");
        state = state.observe(&task.status);
        last = task;
    }

    match state {
        PollState::Succeeded => {
            tracing::info!(ticks, "analysis task succeeded");
            Ok(PollOutcome { task: last, ticks })
        }
        PollState::Failed(status) => {
            tracing::error!(
                ticks,
                %status,
                reason = last.error_message.as_deref().unwrap_or(""),
                "analysis task did not succeed"
            );
            Err(RunError::PollTerminalFailure(status))
        }
        PollState::TimedOut | PollState::Waiting => {
            tracing::error!(ticks, timeout = ?settings.timeout, "timed out waiting for analysis task");
            Err(RunError::PollTimeout {
                timeout: settings.timeout,
                ticks,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Replays scripted statuses; the last one repeats forever.
    struct Scripted {
        statuses: Mutex<Vec<JobStatus>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(statuses: Vec<JobStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TaskSource for Scripted {
        async fn fetch_task(&self, _handle: &JobHandle) -> Result<TaskInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0].clone()
            };
            Ok(TaskInfo {
                status,
                ..Default::default()
            })
        }
    }

    struct Broken;

    impl TaskSource for Broken {
        async fn fetch_task(&self, _handle: &JobHandle) -> Result<TaskInfo> {
            parse_task_response(b"<html>")
        }
    }

    struct Stalled;

    impl TaskSource for Stalled {
        async fn fetch_task(&self, _handle: &JobHandle) -> Result<TaskInfo> {
            std::future::pending().await
        }
    }

    fn handle() -> JobHandle {
        JobHandle::new("http://sonar.local/api/ce/task?id=1")
    }

    fn settings() -> PollSettings {
        PollSettings {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(500),
        }
    }

    #[test]
    fn parses_task_status() {
        let task = parse_task_response(br#"{"task":{"status":"SUCCESS"}}"#).unwrap();
        assert_eq!(task.status, JobStatus::Success);

        let task = parse_task_response(
            br#"{"task":{"id":"AX1","type":"REPORT","status":"IN_PROGRESS","executionTimeMs":12}}"#,
        )
        .unwrap();
        assert_eq!(task.status, JobStatus::InProgress);
        assert_eq!(task.id.as_deref(), Some("AX1"));
        assert_eq!(task.task_type.as_deref(), Some("REPORT"));
        assert_eq!(task.execution_time_ms, Some(12));
    }

    #[test]
    fn unknown_status_is_not_terminal() {
        let task = parse_task_response(br#"{"task":{"status":"QUEUED_SOMEWHERE"}}"#).unwrap();
        assert_eq!(task.status, JobStatus::Unknown);
        assert!(!task.status.is_terminal());
    }

    #[test]
    fn malformed_body_is_parse_error() {
        assert!(matches!(parse_task_response(b"not json"), Err(RunError::PollParse(_))));
        assert!(matches!(parse_task_response(b"{}"), Err(RunError::PollParse(_))));
    }

    #[test]
    fn transitions_from_waiting() {
        assert_eq!(PollState::Waiting.observe(&JobStatus::Success), PollState::Succeeded);
        assert_eq!(
            PollState::Waiting.observe(&JobStatus::Failed),
            PollState::Failed(JobStatus::Failed)
        );
        assert_eq!(
            PollState::Waiting.observe(&JobStatus::Canceled),
            PollState::Failed(JobStatus::Canceled)
        );
        assert_eq!(PollState::Waiting.expire(), PollState::TimedOut);
    }

    #[test]
    fn repeated_non_terminal_status_stays_waiting() {
        let mut state = PollState::Waiting;
        for _ in 0..20 {
            state = state.observe(&JobStatus::Pending);
            assert_eq!(state, PollState::Waiting);
            state = state.observe(&JobStatus::InProgress);
            assert_eq!(state, PollState::Waiting);
        }
    }

    #[test]
    fn terminal_states_absorb() {
        assert_eq!(PollState::Succeeded.observe(&JobStatus::Failed), PollState::Succeeded);
        assert_eq!(PollState::Succeeded.expire(), PollState::Succeeded);
        assert_eq!(PollState::TimedOut.observe(&JobStatus::Success), PollState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_tick_makes_one_call() {
        let source = Scripted::new(vec![JobStatus::Success]);
        let started = Instant::now();

        let outcome = await_completion(&source, &handle(), settings(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(outcome.ticks, 1);
        assert_eq!(outcome.task.status, JobStatus::Success);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_through_pending_states() {
        let source = Scripted::new(vec![
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::InProgress,
            JobStatus::Success,
        ]);

        let outcome = await_completion(&source, &handle(), settings(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls(), 4);
        assert_eq!(outcome.ticks, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn never_terminal_times_out_after_about_ten_ticks() {
        let source = Scripted::new(vec![JobStatus::Pending]);
        let started = Instant::now();

        let err = await_completion(&source, &handle(), settings(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            RunError::PollTimeout { timeout, ticks } => {
                assert_eq!(timeout, Duration::from_secs(5));
                assert!((9..=10).contains(&ticks), "ticks = {ticks}");
                assert_eq!(ticks, source.calls());
                assert!(ticks <= settings().max_ticks());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_is_fatal_immediately() {
        let source = Scripted::new(vec![JobStatus::InProgress, JobStatus::Failed, JobStatus::Success]);

        let err = await_completion(&source, &handle(), settings(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::PollTerminalFailure(JobStatus::Failed)));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn canceled_task_is_fatal() {
        let source = Scripted::new(vec![JobStatus::Canceled]);

        let err = await_completion(&source, &handle(), settings(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::PollTerminalFailure(JobStatus::Canceled)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parse_error_is_not_retried() {
        let err = await_completion(&Broken, &handle(), settings(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::PollParse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_a_stalled_request() {
        let started = Instant::now();

        let err = await_completion(&Stalled, &handle(), settings(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::PollTimeout { ticks: 1, .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let source = Scripted::new(vec![JobStatus::Pending]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = await_completion(&source, &handle(), settings(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled(Stage::Poll)));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_wait_aborts_in_flight_request() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = await_completion(&Stalled, &handle(), settings(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled(Stage::Poll)));
    }
}

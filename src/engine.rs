//! Execution engine: drives scenario rows against a browser collaborator
//! under the run's timing, retry, and capture policy.
//!
//! Each attempt appends exactly one [`ExecutionRecord`]; the log is frozen
//! into an [`ExecutionLog`] with a run-level [`RunOutcome`] when the run
//! ends. The engine itself is synchronous: one row drives one browser
//! interaction at a time, and concurrency lives a level up in the suite
//! runner.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::browser::{
    ActionRequest, BrowserCapability, BrowserError, build_url_with_auth, substitute_user_variables,
};
use crate::capture::{CaptureController, CapturePoint, ScreenshotHandle};
use crate::config::{RunConfiguration, UserCredentials};
use crate::scenario::{ActionKind, Scenario, ScenarioRow};
use crate::timing::{RunMode, TimingPolicy};

/// Terminal state of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt succeeded; the row is done
    Success,
    /// The attempt failed but another one follows
    Retried,
    /// The attempt failed and the retry budget is exhausted
    Failed,
    /// The row never ran (fail-fast after an earlier failure)
    Skipped,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => f.write_str("success"),
            AttemptOutcome::Retried => f.write_str("retried"),
            AttemptOutcome::Failed => f.write_str("failed"),
            AttemptOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// One attempt of one row, as recorded in the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub row_index: usize,
    pub row_id: String,
    pub action: String,
    pub description: String,
    /// 1-based attempt number within the row (0 for skipped rows)
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub error: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub screenshots: Vec<ScreenshotHandle>,
}

/// How the run as a whole ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every row ended in success (retries along the way are fine)
    Succeeded,
    /// All rows ran but at least one exhausted its retries
    CompletedWithFailures { failed_rows: Vec<usize> },
    /// The session became unusable mid-run
    Aborted { reason: String },
    /// A cancellation request stopped the run between rows
    Cancelled,
}

/// Frozen result of one engine run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub records: Vec<ExecutionRecord>,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl ExecutionLog {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Row indices whose final attempt failed
    pub fn failed_rows(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| r.outcome == AttemptOutcome::Failed)
            .map(|r| r.row_index)
            .collect()
    }

    /// Rows that reached success
    pub fn succeeded_rows(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome == AttemptOutcome::Success)
            .count()
    }
}

/// Cooperative cancellation flag, checked before each row starts
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observer notified as records are appended (live progress, JSONL logs)
pub trait LogSink: Send {
    fn on_record(&mut self, record: &ExecutionRecord);
}

/// Drives one scenario against one browser for one user
pub struct ExecutionEngine {
    timing: TimingPolicy,
    capture: CaptureController,
    user: UserCredentials,
    base_url: String,
    mode: RunMode,
    retry_count: u32,
    fail_fast: bool,
    cancel: CancelToken,
    sinks: Vec<Box<dyn LogSink>>,
}

impl ExecutionEngine {
    pub fn new(config: &RunConfiguration, user: UserCredentials, capture: CaptureController) -> Self {
        Self {
            timing: TimingPolicy::resolve(config),
            capture,
            user,
            base_url: config.base_url.clone(),
            mode: config.mode,
            retry_count: config.retry_count,
            fail_fast: config.fail_fast,
            cancel: CancelToken::new(),
            sinks: Vec::new(),
        }
    }

    /// Share a cancellation token with the caller
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Attach a record observer
    pub fn add_sink(&mut self, sink: Box<dyn LogSink>) {
        self.sinks.push(sink);
    }

    /// Run the whole scenario. Always returns a log; failures are encoded in
    /// the outcome, not the return type.
    pub fn run(&mut self, scenario: &Scenario, browser: &mut dyn BrowserCapability) -> ExecutionLog {
        let started_at = Local::now();
        browser.set_mode(self.mode);

        let mut records: Vec<ExecutionRecord> = Vec::new();
        let mut cancelled = false;
        let mut abort_reason: Option<String> = None;

        let rows = scenario.rows();
        let mut iter = rows.iter().peekable();
        while let Some(row) = iter.next() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                tracing::info!(row = row.index, "cancellation requested, stopping run");
                break;
            }

            if let Some(wait) = row.wait_override {
                sleep(wait);
            }

            let row_failed = self.run_row(row, browser, &mut records, &mut abort_reason);

            if abort_reason.is_some() {
                break;
            }
            if row_failed && self.fail_fast {
                for skipped in iter.by_ref() {
                    self.push_record(&mut records, skip_record(skipped));
                }
                break;
            }
            if iter.peek().is_some() {
                sleep(self.timing.delay_between_actions());
            }
        }

        let outcome = if let Some(reason) = abort_reason {
            RunOutcome::Aborted { reason }
        } else if cancelled {
            RunOutcome::Cancelled
        } else {
            let failed: Vec<usize> = records
                .iter()
                .filter(|r| r.outcome == AttemptOutcome::Failed)
                .map(|r| r.row_index)
                .collect();
            if failed.is_empty() {
                RunOutcome::Succeeded
            } else {
                RunOutcome::CompletedWithFailures { failed_rows: failed }
            }
        };

        ExecutionLog {
            records,
            outcome,
            started_at,
            finished_at: Local::now(),
        }
    }

    /// Run one row through its retry budget. Returns true when the row's
    /// final attempt failed; a session-fatal error is reported through
    /// `abort_reason` instead.
    fn run_row(
        &mut self,
        row: &ScenarioRow,
        browser: &mut dyn BrowserCapability,
        records: &mut Vec<ExecutionRecord>,
        abort_reason: &mut Option<String>,
    ) -> bool {
        let attempts = self.retry_count + 1;
        let request = self.resolve_request(row);

        for attempt in 1..=attempts {
            let mut screenshots = Vec::new();
            if let Some(shot) = self
                .capture
                .capture(browser, CapturePoint::BeforeAction, row)
            {
                screenshots.push(shot);
            }

            let started_at = Local::now();
            let result = self.dispatch(row, &request, browser);
            let finished_at = Local::now();

            match result {
                Ok(()) => {
                    if let Some(shot) =
                        self.capture.capture(browser, CapturePoint::AfterAction, row)
                    {
                        screenshots.push(shot);
                    }
                    self.push_record(
                        records,
                        ExecutionRecord {
                            row_index: row.index,
                            row_id: row.id.clone(),
                            action: row.kind.label().to_string(),
                            description: row.description.clone(),
                            attempt,
                            outcome: AttemptOutcome::Success,
                            error: None,
                            started_at,
                            finished_at,
                            screenshots,
                        },
                    );
                    return false;
                }
                Err(err) => {
                    let fatal = err.is_fatal();
                    // After-action shots are taken on every attempt when
                    // configured, whatever the outcome; the error shot is
                    // additional documentation of the failing attempt
                    if let Some(shot) =
                        self.capture.capture(browser, CapturePoint::AfterAction, row)
                    {
                        screenshots.push(shot);
                    }
                    if let Some(shot) = self.capture.capture(browser, CapturePoint::OnError, row) {
                        screenshots.push(shot);
                    }

                    let last = fatal || attempt == attempts;
                    let outcome = if last {
                        AttemptOutcome::Failed
                    } else {
                        AttemptOutcome::Retried
                    };
                    tracing::warn!(
                        row = row.index,
                        attempt,
                        outcome = %outcome,
                        error = %err,
                        "attempt failed"
                    );
                    self.push_record(
                        records,
                        ExecutionRecord {
                            row_index: row.index,
                            row_id: row.id.clone(),
                            action: row.kind.label().to_string(),
                            description: row.description.clone(),
                            attempt,
                            outcome,
                            error: Some(err.to_string()),
                            started_at,
                            finished_at,
                            screenshots,
                        },
                    );

                    if fatal {
                        *abort_reason = Some(err.to_string());
                        return true;
                    }
                    if last {
                        return true;
                    }
                    sleep(self.timing.retry_backoff(attempt));
                }
            }
        }
        unreachable!("attempt loop always returns")
    }

    /// Substitute user variables into the row's target and value
    fn resolve_request(&self, row: &ScenarioRow) -> ActionRequest {
        ActionRequest {
            kind: row.kind,
            target: substitute_user_variables(&row.target, &self.user),
            value: substitute_user_variables(&row.value, &self.user),
        }
    }

    fn dispatch(
        &self,
        row: &ScenarioRow,
        request: &ActionRequest,
        browser: &mut dyn BrowserCapability,
    ) -> Result<(), BrowserError> {
        let timeout = self.timing.attempt_timeout();
        if row.kind == ActionKind::Navigate {
            let url = build_url_with_auth(
                &self.base_url,
                &request.target,
                &self.user.basic_auth_username,
                &self.user.basic_auth_password,
            )
            .ok_or_else(|| BrowserError::Action("no base URL configured".to_string()))?;
            browser.navigate(&url, timeout)
        } else {
            browser.perform(request, timeout)
        }
    }

    fn push_record(&mut self, records: &mut Vec<ExecutionRecord>, record: ExecutionRecord) {
        for sink in &mut self.sinks {
            sink.on_record(&record);
        }
        records.push(record);
    }
}

fn skip_record(row: &ScenarioRow) -> ExecutionRecord {
    let now = Local::now();
    ExecutionRecord {
        row_index: row.index,
        row_id: row.id.clone(),
        action: row.kind.label().to_string(),
        description: row.description.clone(),
        attempt: 0,
        outcome: AttemptOutcome::Skipped,
        error: None,
        started_at: now,
        finished_at: now,
        screenshots: Vec::new(),
    }
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

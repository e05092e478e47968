//! Suite runner: fans one scenario out across all configured users and
//! collects the results into a [`SuiteResult`].
//!
//! Each user gets its own session (its own browser, capture controller, and
//! execution log). Sessions run on plain threads in waves bounded by
//! `max_concurrent_sessions`; the runner joins every wave before starting
//! the next one, so resource use stays bounded without a pool abstraction.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

use crate::browser::{BrowserCapability, BrowserError};
use crate::capture::CaptureController;
use crate::config::{Settings, UserCredentials};
use crate::engine::{CancelToken, ExecutionEngine, ExecutionLog, ExecutionRecord, LogSink, RunOutcome};
use crate::report::{ReportArtifact, ReportCompiler, ReportError};
use crate::scenario::{Scenario, ScenarioError};
use crate::session::RunWorkspace;
use crate::timing::RunMode;

/// Result type for suite operations
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Pre-run failures. Anything that goes wrong after the run starts is
/// encoded in the session logs instead.
#[derive(Debug)]
pub enum RunnerError {
    Scenario(ScenarioError),
    Report(ReportError),
    Io(std::io::Error),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::Scenario(err) => write!(f, "Scenario error: {}", err),
            RunnerError::Report(err) => write!(f, "Report configuration error: {}", err),
            RunnerError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for RunnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunnerError::Scenario(err) => Some(err),
            RunnerError::Report(err) => Some(err),
            RunnerError::Io(err) => Some(err),
        }
    }
}

impl From<ScenarioError> for RunnerError {
    fn from(err: ScenarioError) -> Self {
        RunnerError::Scenario(err)
    }
}

impl From<ReportError> for RunnerError {
    fn from(err: ReportError) -> Self {
        RunnerError::Report(err)
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Io(err)
    }
}

/// One user's finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: usize,
    pub username: String,
    pub log: ExecutionLog,
}

/// The whole run, frozen once every session has finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub scenario_name: String,
    pub browser: String,
    pub mode: RunMode,
    pub sessions: Vec<SessionResult>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl SuiteResult {
    pub fn is_success(&self) -> bool {
        self.sessions.iter().all(|s| s.log.is_success())
    }

    /// Total rows that exhausted their retries, across all sessions
    pub fn total_failed(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.log.failed_rows().len())
            .sum()
    }
}

/// Creates one browser per session. The runner owns sequencing; the factory
/// owns how a session's browser comes to exist.
pub type BrowserFactory =
    dyn Fn(usize, &UserCredentials) -> Result<Box<dyn BrowserCapability>, BrowserError> + Sync;

/// Appends each record as one JSON line, flushed immediately so the file is
/// useful while the run is still going
pub struct JsonlSink {
    writer: std::io::BufWriter<std::fs::File>,
}

impl JsonlSink {
    pub fn create(path: PathBuf) -> std::io::Result<Self> {
        Ok(Self {
            writer: std::io::BufWriter::new(std::fs::File::create(path)?),
        })
    }
}

impl LogSink for JsonlSink {
    fn on_record(&mut self, record: &ExecutionRecord) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(self.writer, "{}", line);
            let _ = self.writer.flush();
        }
    }
}

/// Runs the configured suite end to end: scenario load, session fan-out,
/// result persistence, report compilation.
pub struct SuiteRunner {
    settings: Settings,
    cancel: CancelToken,
}

impl SuiteRunner {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cancel: CancelToken::new(),
        }
    }

    /// Token callers can use to stop the run between rows
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute the suite. Styling and scenario problems fail here, before
    /// any browser is started; everything later lands in the session logs.
    pub fn run(
        &self,
        factory: &BrowserFactory,
    ) -> RunnerResult<(SuiteResult, ReportArtifact, RunWorkspace)> {
        let compiler = ReportCompiler::new(self.settings.report.clone())?;
        let scenario = Scenario::load(&self.settings.run.scenario_path)?;
        let workspace = RunWorkspace::create(&self.settings.output_dir)?;

        let started_at = Local::now();
        tracing::info!(
            scenario = %self.settings.run.scenario_path.display(),
            users = self.settings.run.users.len(),
            browser = %self.settings.run.browser,
            "starting suite"
        );

        let users = self.settings.run.users.clone();
        let max = self.settings.run.max_concurrent_sessions;
        let mut sessions: Vec<SessionResult> = Vec::with_capacity(users.len());

        for (wave, chunk) in users.chunks(max).enumerate() {
            std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .enumerate()
                    .map(|(i, user)| {
                        let session_id = wave * max + i + 1;
                        let scenario = &scenario;
                        let workspace = &workspace;
                        scope.spawn(move || {
                            self.run_session(session_id, user, scenario, workspace, factory)
                        })
                    })
                    .collect();
                for (i, handle) in handles.into_iter().enumerate() {
                    let session_id = wave * max + i + 1;
                    sessions.push(handle.join().unwrap_or_else(|_| {
                        tracing::error!(session = session_id, "session thread panicked");
                        aborted_session(session_id, &chunk[i], "session thread panicked")
                    }));
                }
            });
        }

        let suite = SuiteResult {
            scenario_name: self
                .settings
                .run
                .scenario_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.settings.run.scenario_path.display().to_string()),
            browser: self.settings.run.browser.to_string(),
            mode: self.settings.run.mode,
            sessions,
            started_at,
            finished_at: Local::now(),
        };

        workspace.save_json("test_results", &suite)?;
        let artifact = compiler.compile(&suite);
        workspace.save_json("report", &artifact)?;

        tracing::info!(
            success = suite.is_success(),
            failed_rows = suite.total_failed(),
            output = %workspace.root.display(),
            "suite finished"
        );
        Ok((suite, artifact, workspace))
    }

    fn run_session(
        &self,
        session_id: usize,
        user: &UserCredentials,
        scenario: &Scenario,
        workspace: &RunWorkspace,
        factory: &BrowserFactory,
    ) -> SessionResult {
        tracing::info!(session = session_id, user = %user.app_username, "session starting");

        let shot_dir = match workspace.session_screenshot_dir(session_id) {
            Ok(dir) => dir,
            Err(err) => {
                tracing::warn!(session = session_id, error = %err, "cannot create screenshot dir");
                workspace.screenshot_dir.clone()
            }
        };
        let capture =
            CaptureController::new(&self.settings.run.capture_points, shot_dir, session_id);
        let mut engine = ExecutionEngine::new(&self.settings.run, user.clone(), capture)
            .with_cancel_token(self.cancel.clone());

        match JsonlSink::create(workspace.log_path(&format!("session_{}", session_id))) {
            Ok(sink) => engine.add_sink(Box::new(sink)),
            Err(err) => {
                tracing::warn!(session = session_id, error = %err, "cannot create live log")
            }
        }

        let mut browser = match factory(session_id, user) {
            Ok(browser) => browser,
            Err(err) => {
                tracing::error!(session = session_id, error = %err, "browser startup failed");
                return aborted_session(session_id, user, &err.to_string());
            }
        };

        let log = engine.run(scenario, browser.as_mut());
        tracing::info!(
            session = session_id,
            outcome = ?log.outcome,
            records = log.records.len(),
            "session finished"
        );
        SessionResult {
            session_id,
            username: user.app_username.clone(),
            log,
        }
    }
}

/// A session that never got to run any rows
fn aborted_session(session_id: usize, user: &UserCredentials, reason: &str) -> SessionResult {
    let now = Local::now();
    SessionResult {
        session_id,
        username: user.app_username.clone(),
        log: ExecutionLog {
            records: Vec::new(),
            outcome: RunOutcome::Aborted {
                reason: reason.to_string(),
            },
            started_at: now,
            finished_at: now,
        },
    }
}

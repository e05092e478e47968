//! Browser Pilot - scenario-driven browser testing with styled reports.
//!
//! This crate provides:
//! - CSV scenario loading with a closed action vocabulary
//! - An execution engine with retry, timeout, and fail-fast policy
//! - Screenshot capture at configurable lifecycle points
//! - A deterministic, backend-neutral report artifact with resolved styling
//! - A W3C WebDriver client plus a scripted browser for tests and dry runs
//!
//! # Example
//!
//! ```rust,no_run
//! use browser_pilot::browser::ScriptedBrowser;
//! use browser_pilot::capture::CaptureController;
//! use browser_pilot::config::{RunConfiguration, UserCredentials};
//! use browser_pilot::engine::ExecutionEngine;
//! use browser_pilot::scenario::Scenario;
//!
//! let config = RunConfiguration::default();
//! let scenario = Scenario::load(&config.scenario_path).unwrap();
//! let capture = CaptureController::new(&config.capture_points, "screenshot", 1);
//! let mut engine = ExecutionEngine::new(&config, UserCredentials::default(), capture);
//! let mut browser = ScriptedBrowser::new();
//! let log = engine.run(&scenario, &mut browser);
//! println!("{:?}", log.outcome);
//! ```

pub mod browser;
pub mod capture;
pub mod config;
pub mod engine;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod timing;
pub mod webdriver;

// Re-export scenario types
pub use scenario::{ActionKind, Scenario, ScenarioError, ScenarioRow};

// Re-export engine types
pub use engine::{
    AttemptOutcome, CancelToken, ExecutionEngine, ExecutionLog, ExecutionRecord, LogSink,
    RunOutcome,
};

// Re-export the collaborator seam
pub use browser::{ActionRequest, BrowserCapability, BrowserError, BrowserResult, ScriptedBrowser};

// Re-export capture types
pub use capture::{CaptureController, CapturePoint, ScreenshotHandle};

// Re-export configuration
pub use config::{
    ConfigError, ConfigOverrides, ReportConfiguration, RunConfiguration, Settings, UserCredentials,
};

// Re-export reporting
pub use report::{ReportArtifact, ReportCompiler, ReportError};

// Re-export the suite runner
pub use runner::{SessionResult, SuiteResult, SuiteRunner};

// Re-export timing policy
pub use timing::{RunMode, TimingPolicy};

//! End-to-end tests: CSV scenario through the engine, capture controller,
//! suite runner, and report compiler, all over the scripted browser.

use std::fs;
use std::path::Path;
use std::time::Duration;

use browser_pilot::browser::{BrowserError, ScriptedBrowser};
use browser_pilot::capture::{CaptureController, CapturePoint};
use browser_pilot::config::{
    ReportConfiguration, RunConfiguration, Settings, UserCredentials,
};
use browser_pilot::engine::{AttemptOutcome, ExecutionEngine, RunOutcome};
use browser_pilot::report::{Block, ReportCompiler};
use browser_pilot::runner::SuiteRunner;
use browser_pilot::scenario::Scenario;

fn write_scenario(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("scenario.csv");
    fs::write(&path, body).unwrap();
    path
}

fn config(scenario_path: std::path::PathBuf, retry_count: u32) -> RunConfiguration {
    RunConfiguration {
        scenario_path,
        base_url: "https://example.com".to_string(),
        retry_count,
        timeout_secs: 1,
        action_delay: Some(Duration::ZERO),
        capture_points: Vec::new(),
        ..RunConfiguration::default()
    }
}

fn engine_for(config: &RunConfiguration, shot_dir: &Path) -> ExecutionEngine {
    ExecutionEngine::new(
        config,
        UserCredentials {
            app_username: "alice".to_string(),
            app_password: "pw".to_string(),
            ..UserCredentials::default()
        },
        CaptureController::new(&config.capture_points, shot_dir, 1),
    )
}

#[test]
fn test_csv_scenario_runs_in_file_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scenario(
        dir.path(),
        "id,action,target,value,wait,description,report\n\
         s1,navigate,login,,,open login page,no\n\
         s2,input,#username,${user.username},,enter username,no\n\
         s3,click,#submit,,,submit the form,no\n",
    );
    let scenario = Scenario::load(&path).unwrap();
    assert_eq!(scenario.len(), 3);

    let config = config(path, 0);
    let mut browser = ScriptedBrowser::new();
    let log = engine_for(&config, dir.path()).run(&scenario, &mut browser);

    assert_eq!(log.outcome, RunOutcome::Succeeded);
    assert_eq!(log.records.len(), 3);
    assert_eq!(
        browser.calls(),
        &[
            "navigate https://example.com/login",
            "input #username",
            "click #submit"
        ]
    );
}

// Three rows, the middle one times out on both of its attempts with
// retry_count = 1: four records total, one failed row, per-attempt
// before/error screenshots for the failing row.
#[test]
fn test_timeout_row_with_retry_and_capture() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scenario(
        dir.path(),
        "id,action,target,value,wait,description,report\n\
         s1,click,#ok,,,works,yes\n\
         s2,click,#stuck,,,never responds,yes\n\
         s3,click,#ok2,,,works too,yes\n",
    );
    let scenario = Scenario::load(&path).unwrap();

    let mut config = config(path, 1);
    config.capture_points = vec![CapturePoint::BeforeAction, CapturePoint::OnError];
    let mut browser = ScriptedBrowser::new().always_timeout("#stuck");
    let log = engine_for(&config, dir.path()).run(&scenario, &mut browser);

    assert_eq!(log.records.len(), 4);
    assert_eq!(log.records[0].outcome, AttemptOutcome::Success);
    assert_eq!(log.records[1].outcome, AttemptOutcome::Retried);
    assert_eq!(log.records[2].outcome, AttemptOutcome::Failed);
    assert_eq!(log.records[3].outcome, AttemptOutcome::Success);
    assert_eq!(
        log.outcome,
        RunOutcome::CompletedWithFailures {
            failed_rows: vec![2]
        }
    );

    // Successful rows get the before shot; each failing attempt gets a
    // before shot plus an error shot
    assert_eq!(log.records[0].screenshots.len(), 1);
    assert_eq!(log.records[1].screenshots.len(), 2);
    assert_eq!(log.records[2].screenshots.len(), 2);
    assert_eq!(log.records[3].screenshots.len(), 1);
    for shot in log.records.iter().flat_map(|r| &r.screenshots) {
        assert!(shot.path.exists(), "missing {}", shot.path.display());
    }
}

#[test]
fn test_on_error_only_capture_skips_successes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scenario(
        dir.path(),
        "id,action,target,value,wait,description,report\n\
         s1,click,#ok,,,fine,yes\n\
         s2,click,#broken,,,breaks,yes\n",
    );
    let scenario = Scenario::load(&path).unwrap();

    let mut config = config(path, 0);
    config.capture_points = vec![CapturePoint::OnError];
    let mut browser = ScriptedBrowser::new()
        .script_target("#broken", [Err(BrowserError::Action("gone".to_string()))]);
    let log = engine_for(&config, dir.path()).run(&scenario, &mut browser);

    assert!(log.records[0].screenshots.is_empty());
    assert_eq!(log.records[1].screenshots.len(), 1);
    assert_eq!(log.records[1].screenshots[0].point, CapturePoint::OnError);
}

#[test]
fn test_suite_to_report_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let scenario_path = write_scenario(
        dir.path(),
        "id,action,target,value,wait,description,report\n\
         s1,navigate,home,,,open home,yes\n\
         s2,click,#broken,,,flaky button,yes\n",
    );

    let settings = Settings {
        run: RunConfiguration {
            capture_points: vec![CapturePoint::OnError],
            users: vec![UserCredentials {
                app_username: "alice".to_string(),
                ..UserCredentials::default()
            }],
            ..config(scenario_path, 0)
        },
        report: ReportConfiguration {
            title: "Nightly Smoke".to_string(),
            ..ReportConfiguration::default()
        },
        output_dir: dir.path().join("out"),
    };
    let runner = SuiteRunner::new(settings);
    let (suite, artifact, workspace) = runner
        .run(&|_, _| {
            Ok(Box::new(ScriptedBrowser::new().script_target(
                "#broken",
                [Err(BrowserError::Action("detached".to_string()))],
            )))
        })
        .unwrap();

    assert!(!suite.is_success());
    assert_eq!(suite.total_failed(), 1);

    // Persisted artifacts
    assert!(workspace.result_path("test_results").exists());
    assert!(workspace.result_path("report").exists());
    assert!(workspace.log_path("session_1").exists());

    // Summary, one detail sheet, one screenshot sheet (the error shot
    // opted into the report)
    assert_eq!(artifact.title, "Nightly Smoke");
    let names: Vec<&str> = artifact.sheets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Summary", "Session 1", "Screenshots 1"]);

    // The embedded screenshot exists on disk
    let images: Vec<_> = artifact.sheets[2]
        .blocks
        .iter()
        .filter_map(|b| match b {
            Block::Image(img) => Some(img),
            _ => None,
        })
        .collect();
    assert_eq!(images.len(), 1);
    assert!(images[0].path.exists());
}

#[test]
fn test_report_is_deterministic_for_a_frozen_suite() {
    let dir = tempfile::tempdir().unwrap();
    let scenario_path = write_scenario(
        dir.path(),
        "id,action,target,value,wait,description,report\n\
         s1,click,#x,,,only row,no\n",
    );
    let settings = Settings {
        run: config(scenario_path, 0),
        report: ReportConfiguration::default(),
        output_dir: dir.path().join("out"),
    };
    let (suite, first, _) = SuiteRunner::new(settings)
        .run(&|_, _| Ok(Box::new(ScriptedBrowser::new())))
        .unwrap();

    // Re-compiling the frozen suite never changes the artifact
    let compiler = ReportCompiler::new(ReportConfiguration::default()).unwrap();
    let second = compiler.compile(&suite);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_fail_fast_suite_skips_rest_of_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scenario(
        dir.path(),
        "id,action,target,value,wait,description,report\n\
         s1,click,#broken,,,breaks,no\n\
         s2,click,#a,,,never runs,no\n\
         s3,click,#b,,,never runs,no\n",
    );
    let scenario = Scenario::load(&path).unwrap();

    let mut config = config(path, 0);
    config.fail_fast = true;
    let mut browser = ScriptedBrowser::new()
        .script_target("#broken", [Err(BrowserError::Action("nope".to_string()))]);
    let log = engine_for(&config, dir.path()).run(&scenario, &mut browser);

    let outcomes: Vec<AttemptOutcome> = log.records.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Failed,
            AttemptOutcome::Skipped,
            AttemptOutcome::Skipped
        ]
    );
}

#[test]
fn test_session_loss_aborts_mid_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_scenario(
        dir.path(),
        "id,action,target,value,wait,description,report\n\
         s1,click,#ok,,,fine,no\n\
         s2,click,#crash,,,kills the browser,no\n\
         s3,click,#after,,,unreachable,no\n",
    );
    let scenario = Scenario::load(&path).unwrap();

    let config = config(path, 3);
    let mut browser = ScriptedBrowser::new().script_target(
        "#crash",
        [Err(BrowserError::SessionLost("browser died".to_string()))],
    );
    let log = engine_for(&config, dir.path()).run(&scenario, &mut browser);

    // One success, one fatal failure, nothing after; retries do not apply
    // to a dead session
    assert_eq!(log.records.len(), 2);
    assert!(matches!(
        log.outcome,
        RunOutcome::Aborted { ref reason } if reason.contains("browser died")
    ));
}

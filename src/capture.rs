//! Screenshot capture at configurable points of the action lifecycle.
//!
//! Capture is strictly best-effort: a failed screenshot is logged and
//! skipped, it never fails the row that triggered it. Every stored image is
//! normalized to a fixed size so report pages line up regardless of the
//! browser's window geometry.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::browser::BrowserCapability;
use crate::scenario::ScenarioRow;

/// Normalized screenshot width in pixels
pub const SCREENSHOT_WIDTH: u32 = 1024;

/// Normalized screenshot height in pixels
pub const SCREENSHOT_HEIGHT: u32 = 768;

/// Moments in the action lifecycle at which a screenshot can be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePoint {
    /// Right before an attempt runs
    BeforeAction,
    /// After the row succeeded
    AfterAction,
    /// After a failed attempt
    OnError,
}

impl CapturePoint {
    /// Parse a configuration string; `None` for unknown values
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "before_action" | "before" => Some(CapturePoint::BeforeAction),
            "after_action" | "after" => Some(CapturePoint::AfterAction),
            "on_error" | "error" => Some(CapturePoint::OnError),
            _ => None,
        }
    }

    /// Stable name used in filenames and report labels
    pub fn label(&self) -> &'static str {
        match self {
            CapturePoint::BeforeAction => "before_action",
            CapturePoint::AfterAction => "after_action",
            CapturePoint::OnError => "on_error",
        }
    }
}

impl std::fmt::Display for CapturePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A stored screenshot, referenced later by the report compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotHandle {
    /// Where the normalized PNG was written
    pub path: PathBuf,

    /// Which lifecycle moment produced it
    pub point: CapturePoint,

    /// Whether the owning row opted into report embedding
    pub include_in_report: bool,

    /// Local capture time
    pub captured_at: chrono::DateTime<Local>,
}

/// Decides whether a capture point is active, takes the screenshot, and
/// stores the normalized image under the session's screenshot directory.
#[derive(Debug, Clone)]
pub struct CaptureController {
    points: Vec<CapturePoint>,
    root: PathBuf,
    session_id: usize,
}

impl CaptureController {
    pub fn new(
        points: &[CapturePoint],
        screenshot_dir: impl Into<PathBuf>,
        session_id: usize,
    ) -> Self {
        Self {
            points: points.to_vec(),
            root: screenshot_dir.into(),
            session_id,
        }
    }

    /// Whether `point` is in this run's configured capture set
    pub fn should_capture(&self, point: CapturePoint) -> bool {
        self.points.contains(&point)
    }

    /// Capture the viewport for `row` at `point` if configured.
    ///
    /// Returns `None` when the point is inactive or when any step of the
    /// capture fails; failures are logged and never propagate to the row.
    pub fn capture(
        &self,
        browser: &mut dyn BrowserCapability,
        point: CapturePoint,
        row: &ScenarioRow,
    ) -> Option<ScreenshotHandle> {
        if !self.should_capture(point) {
            return None;
        }

        let bytes = match browser.screenshot() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(row = row.index, point = %point, error = %err, "screenshot failed");
                return None;
            }
        };

        let img = match image::load_from_memory(&bytes) {
            Ok(img) => img,
            Err(err) => {
                tracing::warn!(row = row.index, point = %point, error = %err, "screenshot decode failed");
                return None;
            }
        };
        let img = if img.width() != SCREENSHOT_WIDTH || img.height() != SCREENSHOT_HEIGHT {
            img.resize_exact(
                SCREENSHOT_WIDTH,
                SCREENSHOT_HEIGHT,
                image::imageops::FilterType::Lanczos3,
            )
        } else {
            img
        };

        let captured_at = Local::now();
        let dir = self.root.join(format!("action_{:03}", row.index));
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::warn!(path = %dir.display(), error = %err, "cannot create screenshot directory");
            return None;
        }

        let path = dir.join(format!(
            "{}_{:03}_session_{}_{}.png",
            point.label(),
            row.index,
            self.session_id,
            captured_at.format("%Y%m%d_%H%M%S%3f"),
        ));
        if let Err(err) = img.save(&path) {
            tracing::warn!(path = %path.display(), error = %err, "cannot write screenshot");
            return None;
        }

        tracing::debug!(row = row.index, point = %point, path = %path.display(), "screenshot stored");
        Some(ScreenshotHandle {
            path,
            point,
            include_in_report: row.include_in_report,
            captured_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ScriptedBrowser;
    use crate::scenario::ActionKind;
    use pretty_assertions::assert_eq;

    fn row(index: usize, include_in_report: bool) -> ScenarioRow {
        ScenarioRow {
            index,
            id: format!("step-{}", index),
            kind: ActionKind::Click,
            target: "#button".to_string(),
            value: String::new(),
            wait_override: None,
            description: String::new(),
            include_in_report,
        }
    }

    #[test]
    fn test_capture_normalizes_size() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            CaptureController::new(&[CapturePoint::BeforeAction], dir.path(), 1);
        let mut browser = ScriptedBrowser::new();

        let handle = controller
            .capture(&mut browser, CapturePoint::BeforeAction, &row(1, true))
            .expect("capture configured");
        assert!(handle.path.exists());
        assert!(handle.include_in_report);

        // The mock emits 8x8; the stored file must be normalized
        let stored = image::open(&handle.path).unwrap();
        assert_eq!(stored.width(), SCREENSHOT_WIDTH);
        assert_eq!(stored.height(), SCREENSHOT_HEIGHT);
    }

    #[test]
    fn test_inactive_point_skips_browser_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let controller = CaptureController::new(&[CapturePoint::OnError], dir.path(), 1);
        let mut browser = ScriptedBrowser::new();

        let handle = controller.capture(&mut browser, CapturePoint::AfterAction, &row(1, true));
        assert!(handle.is_none());
        assert!(browser.calls().is_empty());
    }

    #[test]
    fn test_screenshot_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let controller = CaptureController::new(&[CapturePoint::OnError], dir.path(), 1);
        let mut browser = ScriptedBrowser::new().with_screenshot_failure();

        let handle = controller.capture(&mut browser, CapturePoint::OnError, &row(2, false));
        assert!(handle.is_none());
    }

    #[test]
    fn test_report_flag_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let controller = CaptureController::new(&[CapturePoint::AfterAction], dir.path(), 3);
        let mut browser = ScriptedBrowser::new();

        let handle = controller
            .capture(&mut browser, CapturePoint::AfterAction, &row(5, false))
            .unwrap();
        assert!(!handle.include_in_report);
        let name = handle.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("after_action_005_session_3_"));
    }

    #[test]
    fn test_parse_capture_point() {
        assert_eq!(
            CapturePoint::parse("before_action"),
            Some(CapturePoint::BeforeAction)
        );
        assert_eq!(CapturePoint::parse("ON_ERROR"), Some(CapturePoint::OnError));
        assert_eq!(CapturePoint::parse("sometimes"), None);
    }
}

//! Scenario loading and validation.
//!
//! A scenario is a CSV file whose rows are executed strictly in source order.
//! Columns: `id,action,target,value,wait,description,report`. The first row
//! is a header and never becomes an action row. Any malformed row (unknown
//! action, bad wait value, wrong column count) fails the whole load — there
//! is no partial scenario execution.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Values treated as "yes" for the per-row report flag (lowercased)
pub const REPORT_YES_VALUES: &[&str] = &["yes", "y", "true", "1"];

/// Result type for scenario operations
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// Errors raised while loading a scenario file. All of these are fatal for
/// the run: a scenario either loads completely or not at all.
#[derive(Debug)]
pub enum ScenarioError {
    /// Scenario file missing or unreadable
    Io(PathBuf, std::io::Error),

    /// CSV-level parse failure (quoting, column count)
    Csv(csv::Error),

    /// A row carries an action kind the engine does not know
    UnknownAction { row: usize, action: String },

    /// A row's wait column is present but not a number of seconds
    InvalidWait { row: usize, value: String },

    /// The file parsed but contains no action rows
    Empty(PathBuf),
}

impl std::fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioError::Io(path, err) => {
                write!(f, "Cannot read scenario '{}': {}", path.display(), err)
            }
            ScenarioError::Csv(err) => write!(f, "Scenario parse error: {}", err),
            ScenarioError::UnknownAction { row, action } => {
                write!(f, "Row {}: unknown action '{}'", row, action)
            }
            ScenarioError::InvalidWait { row, value } => {
                write!(f, "Row {}: invalid wait value '{}'", row, value)
            }
            ScenarioError::Empty(path) => {
                write!(f, "Scenario '{}' contains no rows", path.display())
            }
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScenarioError::Io(_, err) => Some(err),
            ScenarioError::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<csv::Error> for ScenarioError {
    fn from(err: csv::Error) -> Self {
        ScenarioError::Csv(err)
    }
}

/// The closed set of browser actions a scenario row can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Navigate to a URL or path (resolved against the configured base URL)
    Navigate,
    /// Clear a field and type the value into it
    Input,
    /// Scroll to an element and click it
    Click,
    /// Click an element through script injection (bypasses overlay checks)
    ForceClick,
    /// Click by running `querySelector(..).click()` directly
    JsClick,
    /// Choose an option in a select element by value
    Select,
    /// Wait for an element to appear
    WaitFor,
    /// Assert that an element's text contains the expected value
    Assert,
    /// Execute a raw script in the page
    Script,
}

impl ActionKind {
    /// Parse the CSV action column. Accepts the snake_case name and a few
    /// spelling variants seen in hand-edited scenario files.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "navigate" | "goto" | "url" => Some(ActionKind::Navigate),
            "input" | "type" | "text_input" => Some(ActionKind::Input),
            "click" => Some(ActionKind::Click),
            "force_click" => Some(ActionKind::ForceClick),
            "js_click" => Some(ActionKind::JsClick),
            "select" => Some(ActionKind::Select),
            "wait" | "wait_for" => Some(ActionKind::WaitFor),
            "assert" => Some(ActionKind::Assert),
            "script" => Some(ActionKind::Script),
            _ => None,
        }
    }

    /// Human-readable name used in logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Input => "input",
            ActionKind::Click => "click",
            ActionKind::ForceClick => "force_click",
            ActionKind::JsClick => "js_click",
            ActionKind::Select => "select",
            ActionKind::WaitFor => "wait_for",
            ActionKind::Assert => "assert",
            ActionKind::Script => "script",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One automation step, in execution order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRow {
    /// 1-based position in the source file; immutable once loaded
    pub index: usize,

    /// Step id from the file (free-form, shown in reports)
    pub id: String,

    /// What to do
    pub kind: ActionKind,

    /// Element selector or URL path, depending on the action
    pub target: String,

    /// Input value, expected text, or script body
    pub value: String,

    /// Optional sleep applied before the row runs
    pub wait_override: Option<Duration>,

    /// Free-form description shown in logs and reports
    pub description: String,

    /// Whether this row's screenshots are embedded in the report
    pub include_in_report: bool,
}

/// Raw CSV row shape; turned into a validated [`ScenarioRow`] after parsing
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(default)]
    id: String,
    action: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    wait: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    report: String,
}

/// An ordered, validated sequence of scenario rows
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Source file the scenario was loaded from
    pub source: PathBuf,
    rows: Vec<ScenarioRow>,
}

impl Scenario {
    /// Load and validate a scenario CSV file.
    ///
    /// The first line must be the header (`id,action,target,...`); the csv
    /// reader consumes it so it never produces a phantom action row.
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut rows = Vec::new();
        for (i, result) in reader.deserialize::<RawRow>().enumerate() {
            let index = i + 1;
            let raw = result?;
            rows.push(Self::validate_row(index, raw)?);
        }

        if rows.is_empty() {
            return Err(ScenarioError::Empty(path.to_path_buf()));
        }

        Ok(Self {
            source: path.to_path_buf(),
            rows,
        })
    }

    /// Build a scenario from already-constructed rows (tests, editors)
    pub fn from_rows(source: impl Into<PathBuf>, rows: Vec<ScenarioRow>) -> Self {
        Self {
            source: source.into(),
            rows,
        }
    }

    fn validate_row(index: usize, raw: RawRow) -> ScenarioResult<ScenarioRow> {
        let kind = ActionKind::parse(&raw.action).ok_or_else(|| ScenarioError::UnknownAction {
            row: index,
            action: raw.action.clone(),
        })?;

        let wait_override = if raw.wait.is_empty() {
            None
        } else {
            // try_from_secs_f64 rejects negative, non-finite, and values
            // beyond Duration's range in one place
            let wait = raw
                .wait
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| ScenarioError::InvalidWait {
                    row: index,
                    value: raw.wait.clone(),
                })?;
            Some(wait)
        };

        let include_in_report = REPORT_YES_VALUES.contains(&raw.report.to_lowercase().as_str());

        Ok(ScenarioRow {
            index,
            id: if raw.id.is_empty() {
                index.to_string()
            } else {
                raw.id
            },
            kind,
            target: raw.target,
            value: raw.value,
            wait_override,
            description: raw.description,
            include_in_report,
        })
    }

    /// Rows in execution order
    pub fn rows(&self) -> &[ScenarioRow] {
        &self.rows
    }

    /// Number of action rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the scenario has no rows (cannot happen after `load`)
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_scenario(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_load_preserves_order_and_count() {
        let f = write_scenario(
            "id,action,target,value,wait,description,report\n\
             1,navigate,/login,,,open login page,\n\
             2,input,#user,alice,,enter user,yes\n\
             3,click,#submit,,0.5,submit form,no\n",
        );
        let scenario = Scenario::load(f.path()).unwrap();
        assert_eq!(scenario.len(), 3);
        let rows = scenario.rows();
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].kind, ActionKind::Navigate);
        assert_eq!(rows[1].index, 2);
        assert_eq!(rows[1].target, "#user");
        assert!(rows[1].include_in_report);
        assert_eq!(rows[2].index, 3);
        assert_eq!(rows[2].wait_override, Some(Duration::from_millis(500)));
        assert!(!rows[2].include_in_report);
    }

    #[test]
    fn test_header_row_is_not_an_action() {
        let f = write_scenario(
            "id,action,target,value,wait,description,report\n\
             1,click,#ok,,,,\n",
        );
        let scenario = Scenario::load(f.path()).unwrap();
        assert_eq!(scenario.len(), 1);
    }

    #[test]
    fn test_unknown_action_is_fatal() {
        let f = write_scenario(
            "id,action,target,value,wait,description,report\n\
             1,teleport,#ok,,,,\n",
        );
        match Scenario::load(f.path()) {
            Err(ScenarioError::UnknownAction { row, action }) => {
                assert_eq!(row, 1);
                assert_eq!(action, "teleport");
            }
            other => panic!("expected UnknownAction, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_wait_is_fatal() {
        let f = write_scenario(
            "id,action,target,value,wait,description,report\n\
             1,click,#ok,,soon,,\n",
        );
        assert!(matches!(
            Scenario::load(f.path()),
            Err(ScenarioError::InvalidWait { row: 1, .. })
        ));
    }

    #[test]
    fn test_out_of_range_wait_is_fatal_not_a_panic() {
        for bad in ["1e300", "-1", "inf", "nan"] {
            let f = write_scenario(&format!(
                "id,action,target,value,wait,description,report\n\
                 1,click,#ok,,{},,\n",
                bad
            ));
            assert!(
                matches!(
                    Scenario::load(f.path()),
                    Err(ScenarioError::InvalidWait { row: 1, .. })
                ),
                "wait '{}' must be rejected as InvalidWait",
                bad
            );
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Scenario::load("/nonexistent/scenario.csv"),
            Err(ScenarioError::Io(..))
        ));
    }

    #[test]
    fn test_empty_scenario_rejected() {
        let f = write_scenario("id,action,target,value,wait,description,report\n");
        assert!(matches!(
            Scenario::load(f.path()),
            Err(ScenarioError::Empty(_))
        ));
    }

    #[test]
    fn test_report_flag_truthy_values() {
        for v in ["yes", "Y", "TRUE", "1"] {
            let f = write_scenario(&format!(
                "id,action,target,value,wait,description,report\n1,click,#a,,,,{}\n",
                v
            ));
            assert!(Scenario::load(f.path()).unwrap().rows()[0].include_in_report);
        }
        for v in ["no", "", "0", "maybe"] {
            let f = write_scenario(&format!(
                "id,action,target,value,wait,description,report\n1,click,#a,,,,{}\n",
                v
            ));
            assert!(!Scenario::load(f.path()).unwrap().rows()[0].include_in_report);
        }
    }

    #[test]
    fn test_action_kind_aliases() {
        assert_eq!(ActionKind::parse("goto"), Some(ActionKind::Navigate));
        assert_eq!(ActionKind::parse("Force-Click"), Some(ActionKind::ForceClick));
        assert_eq!(ActionKind::parse("type"), Some(ActionKind::Input));
        assert_eq!(ActionKind::parse(""), None);
    }
}

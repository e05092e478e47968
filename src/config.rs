//! Configuration loading and merging.
//!
//! The configuration family mirrors the editable settings files the desktop
//! shell produces: a main `config.toml`, a URL config (`base_url`), and a
//! user config (`[[users]]`). Command-line flags override file values; for
//! the mode booleans either side being true wins.
//!
//! [`RunConfiguration`] and [`ReportConfiguration`] are immutable for the
//! duration of a run: they are resolved once here and only read afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CapturePoint;
use crate::timing::{DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_SECS, RunMode};

// ============================================================================
// Default Values
// ============================================================================

/// Default main configuration file
pub const DEFAULT_CONFIG_PATH: &str = "resources/config.toml";

/// Default URL configuration file
pub const DEFAULT_URL_CONFIG: &str = "resources/url/default.toml";

/// Default user configuration file
pub const DEFAULT_USER_CONFIG: &str = "resources/user/default.toml";

/// Default scenario file
pub const DEFAULT_SCENARIO: &str = "resources/scenario/default.csv";

/// Default WebDriver endpoint (chromedriver)
pub const DEFAULT_WEBDRIVER_URL: &str = "http://127.0.0.1:9515";

/// Default output base directory
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Default cap on concurrently running sessions
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 5;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration. All are fatal before the run
/// starts; nothing here is recovered from mid-run.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file missing or unreadable
    Io(PathBuf, std::io::Error),

    /// TOML syntax or shape error
    Toml(PathBuf, toml::de::Error),

    /// The user config holds no users; a run needs at least one session
    NoUsers(PathBuf),

    /// Unknown entry in `screenshot_timing`
    InvalidCapturePoint(String),

    /// Browser name outside the supported set
    InvalidBrowser(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, err) => {
                write!(f, "Cannot read config '{}': {}", path.display(), err)
            }
            ConfigError::Toml(path, err) => {
                write!(f, "Invalid TOML in '{}': {}", path.display(), err)
            }
            ConfigError::NoUsers(path) => {
                write!(f, "No users configured in '{}'", path.display())
            }
            ConfigError::InvalidCapturePoint(value) => {
                write!(
                    f,
                    "Unknown screenshot timing '{}' (expected before_action, after_action, on_error)",
                    value
                )
            }
            ConfigError::InvalidBrowser(value) => {
                write!(
                    f,
                    "Unknown browser '{}' (expected chrome, firefox, edge, safari)",
                    value
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, err) => Some(err),
            ConfigError::Toml(_, err) => Some(err),
            _ => None,
        }
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

/// Supported browser identifiers, forwarded to the WebDriver endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chrome,
    Firefox,
    Edge,
    Safari,
}

impl BrowserKind {
    /// Parse a browser name; `None` for anything outside the supported set
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "chrome" => Some(BrowserKind::Chrome),
            "firefox" => Some(BrowserKind::Firefox),
            "edge" => Some(BrowserKind::Edge),
            "safari" => Some(BrowserKind::Safari),
            _ => None,
        }
    }

    /// The `browserName` capability value
    pub fn capability_name(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Edge => "MicrosoftEdge",
            BrowserKind::Safari => "safari",
        }
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserKind::Chrome => f.write_str("chrome"),
            BrowserKind::Firefox => f.write_str("firefox"),
            BrowserKind::Edge => f.write_str("edge"),
            BrowserKind::Safari => f.write_str("safari"),
        }
    }
}

/// Credentials and attributes for one session's user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserCredentials {
    #[serde(default)]
    pub app_username: String,
    #[serde(default)]
    pub app_password: String,
    #[serde(default)]
    pub basic_auth_username: String,
    #[serde(default)]
    pub basic_auth_password: String,
    /// Any additional keys usable via `${user.<key>}` substitution
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl UserCredentials {
    /// Look up a substitution key. `username`/`password` alias the app
    /// credential pair.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "username" | "app_username" => Some(&self.app_username),
            "password" | "app_password" => Some(&self.app_password),
            "basic_auth_username" => Some(&self.basic_auth_username),
            "basic_auth_password" => Some(&self.basic_auth_password),
            other => self.extra.get(other).map(String::as_str),
        }
    }
}

/// Everything the engine needs for one run; read-only once built
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub scenario_path: PathBuf,
    pub base_url: String,
    pub users: Vec<UserCredentials>,
    pub browser: BrowserKind,
    pub mode: RunMode,
    /// Explicit inter-action delay; overrides the mode-implied default
    pub action_delay: Option<Duration>,
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub debug: bool,
    /// Stop the run at the first failed row instead of continuing
    pub fail_fast: bool,
    pub capture_points: Vec<CapturePoint>,
    pub max_concurrent_sessions: usize,
    pub webdriver_url: String,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            scenario_path: PathBuf::from(DEFAULT_SCENARIO),
            base_url: String::new(),
            users: Vec::new(),
            browser: BrowserKind::Chrome,
            mode: RunMode::Normal,
            action_delay: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            debug: false,
            fail_fast: false,
            capture_points: vec![CapturePoint::OnError],
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
        }
    }
}

/// Branding and styling inputs for the report compiler; read-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfiguration {
    pub title: String,
    pub company_name: String,
    pub project_name: String,
    pub logo_path: Option<PathBuf>,
    /// Display zoom for screenshot sheets, percent
    pub zoom_scale: u16,
    pub include_timestamp: bool,
    /// strftime-style format for the header timestamp
    pub timestamp_format: String,
    pub header_bg_color: String,
    pub header_font_color: String,
    pub alt_row_color: String,
    pub success_color: String,
    pub failure_color: String,
    pub screenshot_title_color: String,
}

impl Default for ReportConfiguration {
    fn default() -> Self {
        Self {
            title: "Test Execution Report".to_string(),
            company_name: String::new(),
            project_name: String::new(),
            logo_path: None,
            zoom_scale: 50,
            include_timestamp: true,
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            header_bg_color: "#4472C4".to_string(),
            header_font_color: "#FFFFFF".to_string(),
            alt_row_color: "#E6F0FF".to_string(),
            success_color: "#C6EFCE".to_string(),
            failure_color: "#FFC7CE".to_string(),
            screenshot_title_color: "#FFEBCD".to_string(),
        }
    }
}

/// Resolved settings for one invocation
#[derive(Debug, Clone)]
pub struct Settings {
    pub run: RunConfiguration,
    pub report: ReportConfiguration,
    /// Base directory under which timestamped output trees are created
    pub output_dir: PathBuf,
}

/// Command-line values that override file configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub scenario: Option<PathBuf>,
    pub url_config: Option<PathBuf>,
    pub user_config: Option<PathBuf>,
    pub browser: Option<String>,
    pub test_mode: bool,
    pub slow_mode: bool,
    pub action_delay: Option<f64>,
    pub debug: bool,
    pub fail_fast: bool,
    pub webdriver_url: Option<String>,
    pub output_dir: Option<PathBuf>,
}

// ============================================================================
// File shapes
// ============================================================================

/// `screenshot_timing` accepts a single string or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Flat shape of the main config.toml
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    url_config: Option<String>,
    user_config: Option<String>,
    scenario_config: Option<String>,
    browser: Option<String>,
    test_mode: bool,
    slow_mode: bool,
    action_delay: Option<f64>,
    timeout: Option<u64>,
    retry_count: Option<u32>,
    debug_mode: bool,
    fail_fast: bool,
    screenshot_timing: Option<OneOrMany>,
    max_concurrent_sessions: Option<usize>,
    webdriver_url: Option<String>,

    // Report keys, flat as the configuration editor writes them
    report_title: Option<String>,
    company_name: Option<String>,
    project_name: Option<String>,
    report_logo: Option<String>,
    zoom_scale: Option<u16>,
    include_timestamp: Option<bool>,
    timestamp_format: Option<String>,
    header_bg_color: Option<String>,
    header_font_color: Option<String>,
    alt_row_color: Option<String>,
    success_color: Option<String>,
    failure_color: Option<String>,
    screenshot_title_color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawUrlConfig {
    base_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawUserConfig {
    users: Vec<UserCredentials>,
}

// ============================================================================
// Loading
// ============================================================================

impl Settings {
    /// Load and merge the configuration family.
    ///
    /// Resolution order for each value: command line, then main config file,
    /// then the built-in default. The URL/user/scenario file paths themselves
    /// follow the same order.
    pub fn load(config_path: impl AsRef<Path>, overrides: &ConfigOverrides) -> ConfigResult<Self> {
        let config_path = ensure_extension(config_path.as_ref(), "toml");
        let raw: RawConfig = read_toml(&config_path)?;

        let url_config_path = overrides
            .url_config
            .clone()
            .or_else(|| raw.url_config.as_deref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_URL_CONFIG));
        let user_config_path = overrides
            .user_config
            .clone()
            .or_else(|| raw.user_config.as_deref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_USER_CONFIG));
        let scenario_path = overrides
            .scenario
            .clone()
            .or_else(|| raw.scenario_config.as_deref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SCENARIO));

        let base_url = load_base_url(&ensure_extension(&url_config_path, "toml"))?;
        let users = load_users(&ensure_extension(&user_config_path, "toml"))?;

        // Either side being true wins for the mode booleans
        let test_mode = overrides.test_mode || raw.test_mode;
        let slow_mode = overrides.slow_mode || raw.slow_mode;
        let mode = if test_mode {
            RunMode::Test
        } else if slow_mode {
            RunMode::Slow
        } else {
            RunMode::Normal
        };

        // try_from_secs_f64 rejects negative, non-finite, and out-of-range
        // values; a nonsense delay is ignored rather than fatal
        let action_delay = overrides
            .action_delay
            .or(raw.action_delay)
            .and_then(|d| Duration::try_from_secs_f64(d).ok());

        let capture_points = match raw.screenshot_timing {
            Some(raw_points) => parse_capture_points(raw_points.into_vec())?,
            None => vec![CapturePoint::OnError],
        };

        // A misspelled browser is a fatal setting, not a silent Chrome run
        let browser_name = overrides
            .browser
            .as_deref()
            .or(raw.browser.as_deref())
            .unwrap_or("chrome");
        let browser = BrowserKind::parse(browser_name)
            .ok_or_else(|| ConfigError::InvalidBrowser(browser_name.to_string()))?;

        let run = RunConfiguration {
            scenario_path: ensure_extension(&scenario_path, "csv"),
            base_url,
            users,
            browser,
            mode,
            action_delay,
            timeout_secs: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry_count: raw.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            debug: overrides.debug || raw.debug_mode,
            fail_fast: overrides.fail_fast || raw.fail_fast,
            capture_points,
            max_concurrent_sessions: raw
                .max_concurrent_sessions
                .unwrap_or(DEFAULT_MAX_CONCURRENT_SESSIONS)
                .max(1),
            webdriver_url: overrides
                .webdriver_url
                .clone()
                .or(raw.webdriver_url)
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
        };

        let defaults = ReportConfiguration::default();
        let report = ReportConfiguration {
            title: raw.report_title.unwrap_or(defaults.title),
            company_name: raw.company_name.unwrap_or(defaults.company_name),
            project_name: raw.project_name.unwrap_or(defaults.project_name),
            logo_path: raw
                .report_logo
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            zoom_scale: raw.zoom_scale.unwrap_or(defaults.zoom_scale),
            include_timestamp: raw.include_timestamp.unwrap_or(defaults.include_timestamp),
            timestamp_format: raw.timestamp_format.unwrap_or(defaults.timestamp_format),
            header_bg_color: raw.header_bg_color.unwrap_or(defaults.header_bg_color),
            header_font_color: raw.header_font_color.unwrap_or(defaults.header_font_color),
            alt_row_color: raw.alt_row_color.unwrap_or(defaults.alt_row_color),
            success_color: raw.success_color.unwrap_or(defaults.success_color),
            failure_color: raw.failure_color.unwrap_or(defaults.failure_color),
            screenshot_title_color: raw
                .screenshot_title_color
                .unwrap_or(defaults.screenshot_title_color),
        };

        Ok(Settings {
            run,
            report,
            output_dir: overrides
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        })
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| ConfigError::Toml(path.to_path_buf(), e))
}

fn load_base_url(path: &Path) -> ConfigResult<String> {
    let raw: RawUrlConfig = read_toml(path)?;
    let mut base_url = raw.base_url.or(raw.url).unwrap_or_default();
    if base_url.is_empty() {
        tracing::warn!(path = %path.display(), "URL config has no base_url");
    } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        base_url = format!("https://{}", base_url);
    }
    Ok(base_url)
}

fn load_users(path: &Path) -> ConfigResult<Vec<UserCredentials>> {
    let raw: RawUserConfig = read_toml(path)?;
    if raw.users.is_empty() {
        return Err(ConfigError::NoUsers(path.to_path_buf()));
    }
    Ok(raw.users)
}

fn parse_capture_points(raw: Vec<String>) -> ConfigResult<Vec<CapturePoint>> {
    raw.into_iter()
        .map(|s| CapturePoint::parse(&s).ok_or(ConfigError::InvalidCapturePoint(s)))
        .collect()
}

/// Append `ext` when the path has no extension; config editors routinely
/// store bare names
fn ensure_extension(path: &Path, ext: &str) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_family(dir: &Path, main: &str) -> PathBuf {
        let config = dir.join("config.toml");
        std::fs::write(&config, main).unwrap();
        std::fs::write(dir.join("url.toml"), "base_url = \"example.com\"\n").unwrap();
        std::fs::write(
            dir.join("users.toml"),
            "[[users]]\napp_username = \"alice\"\napp_password = \"pw\"\n",
        )
        .unwrap();
        config
    }

    fn overrides_for(dir: &Path) -> ConfigOverrides {
        ConfigOverrides {
            url_config: Some(dir.join("url.toml")),
            user_config: Some(dir.join("users.toml")),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn test_load_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_family(
            dir.path(),
            "browser = \"firefox\"\ntimeout = 10\nretry_count = 1\n\
             screenshot_timing = [\"before_action\", \"on_error\"]\n\
             report_title = \"Nightly\"\n",
        );
        let settings = Settings::load(&config, &overrides_for(dir.path())).unwrap();

        assert_eq!(settings.run.browser, BrowserKind::Firefox);
        assert_eq!(settings.run.timeout_secs, 10);
        assert_eq!(settings.run.retry_count, 1);
        // Missing scheme gets https
        assert_eq!(settings.run.base_url, "https://example.com");
        assert_eq!(settings.run.users.len(), 1);
        assert_eq!(
            settings.run.capture_points,
            vec![CapturePoint::BeforeAction, CapturePoint::OnError]
        );
        assert_eq!(settings.report.title, "Nightly");
    }

    #[test]
    fn test_mode_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_family(dir.path(), "slow_mode = true\n");

        let settings = Settings::load(&config, &overrides_for(dir.path())).unwrap();
        assert_eq!(settings.run.mode, RunMode::Slow);

        // CLI test-mode wins over file slow-mode
        let mut ov = overrides_for(dir.path());
        ov.test_mode = true;
        let settings = Settings::load(&config, &ov).unwrap();
        assert_eq!(settings.run.mode, RunMode::Test);
    }

    #[test]
    fn test_capture_point_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_family(dir.path(), "screenshot_timing = [\"sometimes\"]\n");
        assert!(matches!(
            Settings::load(&config, &overrides_for(dir.path())),
            Err(ConfigError::InvalidCapturePoint(_))
        ));
    }

    #[test]
    fn test_single_string_capture_point() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_family(dir.path(), "screenshot_timing = \"after_action\"\n");
        let settings = Settings::load(&config, &overrides_for(dir.path())).unwrap();
        assert_eq!(settings.run.capture_points, vec![CapturePoint::AfterAction]);
    }

    #[test]
    fn test_empty_users_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_family(dir.path(), "");
        std::fs::write(dir.path().join("users.toml"), "users = []\n").unwrap();
        assert!(matches!(
            Settings::load(&config, &overrides_for(dir.path())),
            Err(ConfigError::NoUsers(_))
        ));
    }

    #[test]
    fn test_missing_config_is_fatal() {
        assert!(matches!(
            Settings::load("/nonexistent/config.toml", &ConfigOverrides::default()),
            Err(ConfigError::Io(..))
        ));
    }

    #[test]
    fn test_explicit_action_delay_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_family(dir.path(), "action_delay = 1.5\n");
        let settings = Settings::load(&config, &overrides_for(dir.path())).unwrap();
        assert_eq!(settings.run.action_delay, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_out_of_range_action_delay_is_ignored_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["1e300", "-2.0", "nan"] {
            let config = write_family(dir.path(), &format!("action_delay = {}\n", bad));
            let settings = Settings::load(&config, &overrides_for(dir.path())).unwrap();
            assert_eq!(settings.run.action_delay, None, "delay {} must be dropped", bad);
        }
    }

    #[test]
    fn test_unknown_browser_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_family(dir.path(), "browser = \"netscape\"\n");
        assert!(matches!(
            Settings::load(&config, &overrides_for(dir.path())),
            Err(ConfigError::InvalidBrowser(name)) if name == "netscape"
        ));
    }

    #[test]
    fn test_user_credentials_aliases() {
        let user = UserCredentials {
            app_username: "bob".to_string(),
            extra: BTreeMap::from([("tenant".to_string(), "acme".to_string())]),
            ..UserCredentials::default()
        };
        assert_eq!(user.get("username"), Some("bob"));
        assert_eq!(user.get("app_username"), Some("bob"));
        assert_eq!(user.get("tenant"), Some("acme"));
        assert_eq!(user.get("unknown"), None);
    }

    #[test]
    fn test_ensure_extension() {
        assert_eq!(
            ensure_extension(Path::new("resources/config"), "toml"),
            PathBuf::from("resources/config.toml")
        );
        assert_eq!(
            ensure_extension(Path::new("resources/config.toml"), "toml"),
            PathBuf::from("resources/config.toml")
        );
    }
}

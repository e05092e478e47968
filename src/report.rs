//! Report compilation: turns a finished suite into a styled, backend-neutral
//! artifact.
//!
//! The artifact is a pure data structure (sheets of heading/table/image
//! blocks with resolved colors) that a rendering backend can turn into a
//! workbook or page without re-deriving any styling. Compilation is
//! deterministic: the same suite input always produces the same artifact,
//! timestamps included, because every formatted time comes from the suite
//! itself.

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ReportConfiguration;
use crate::engine::{AttemptOutcome, ExecutionRecord};
use crate::runner::{SessionResult, SuiteResult};

/// Width logos are scaled to in the summary header
pub const LOGO_TARGET_WIDTH: u32 = 200;

/// Accepted zoom range for screenshot sheets, percent
pub const ZOOM_RANGE: std::ops::RangeInclusive<u16> = 10..=400;

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Styling validation failures. All are fatal at compiler construction;
/// nothing styling-related fails during compilation itself.
#[derive(Debug)]
pub enum ReportError {
    InvalidColor { field: &'static str, value: String },
    InvalidZoom(u16),
    InvalidTimestampFormat(String),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::InvalidColor { field, value } => {
                write!(f, "Invalid color '{}' for {}", value, field)
            }
            ReportError::InvalidZoom(zoom) => {
                write!(
                    f,
                    "Zoom {}% out of range ({}..={}%)",
                    zoom,
                    ZOOM_RANGE.start(),
                    ZOOM_RANGE.end()
                )
            }
            ReportError::InvalidTimestampFormat(fmt) => {
                write!(f, "Invalid timestamp format '{}'", fmt)
            }
        }
    }
}

impl std::error::Error for ReportError {}

// ============================================================================
// Colors
// ============================================================================

/// A resolved sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
pub const WHITE: Rgb = Rgb {
    r: 255,
    g: 255,
    b: 255,
};

impl Rgb {
    /// `#RRGGBB` form
    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Perceived brightness on a 0..=255 scale (ITU-R BT.601 weights)
    pub fn brightness(&self) -> u32 {
        (299 * self.r as u32 + 587 * self.g as u32 + 114 * self.b as u32) / 1000
    }

    /// Black or white, whichever reads better on this fill
    pub fn contrast_font(&self) -> Rgb {
        if self.brightness() >= 128 { BLACK } else { WHITE }
    }
}

/// Parse `#RRGGBB` or `RRGGBB` (case-insensitive)
pub fn parse_hex_color(s: &str) -> Option<Rgb> {
    let hex = s.trim().strip_prefix('#').unwrap_or(s.trim());
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(Rgb {
        r: u8::from_str_radix(&hex[0..2], 16).ok()?,
        g: u8::from_str_radix(&hex[2..4], 16).ok()?,
        b: u8::from_str_radix(&hex[4..6], 16).ok()?,
    })
}

// ============================================================================
// Artifact model
// ============================================================================

/// The compiled report: an ordered list of sheets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportArtifact {
    pub title: String,
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    /// Display zoom percent; only screenshot sheets set this
    pub zoom: Option<u16>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Heading(Heading),
    Table(Table),
    Image(ImageBlock),
    Text { text: String },
}

/// A full-width colored title bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub text: String,
    pub fill: Rgb,
    pub font: Rgb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub header_fill: Rgb,
    pub header_font: Rgb,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<String>,
    pub fill: Option<Rgb>,
}

/// An embedded image with a labelled caption bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub path: PathBuf,
    pub label: String,
    pub label_fill: Option<Rgb>,
    /// Render size; `None` leaves the image at its stored size
    pub width: Option<u32>,
    pub height: Option<u32>,
}

// ============================================================================
// Compiler
// ============================================================================

/// Validated styling palette
#[derive(Debug, Clone, Copy)]
struct Palette {
    header_bg: Rgb,
    header_font: Rgb,
    alt_row: Rgb,
    success: Rgb,
    failure: Rgb,
    screenshot_title: Rgb,
}

/// Compiles [`SuiteResult`]s into [`ReportArtifact`]s.
///
/// Construction validates the whole styling configuration up front so a bad
/// color or zoom value fails before the run starts, not after it.
#[derive(Debug)]
pub struct ReportCompiler {
    config: ReportConfiguration,
    palette: Palette,
}

impl ReportCompiler {
    pub fn new(config: ReportConfiguration) -> ReportResult<Self> {
        let color = |field: &'static str, value: &str| {
            parse_hex_color(value).ok_or(ReportError::InvalidColor {
                field,
                value: value.to_string(),
            })
        };
        let palette = Palette {
            header_bg: color("header_bg_color", &config.header_bg_color)?,
            header_font: color("header_font_color", &config.header_font_color)?,
            alt_row: color("alt_row_color", &config.alt_row_color)?,
            success: color("success_color", &config.success_color)?,
            failure: color("failure_color", &config.failure_color)?,
            screenshot_title: color("screenshot_title_color", &config.screenshot_title_color)?,
        };

        if !ZOOM_RANGE.contains(&config.zoom_scale) {
            return Err(ReportError::InvalidZoom(config.zoom_scale));
        }
        validate_strftime(&config.timestamp_format)?;

        Ok(Self { config, palette })
    }

    /// Compile a finished suite. Never fails: degraded inputs (missing logo,
    /// missing screenshots) are logged and omitted.
    pub fn compile(&self, suite: &SuiteResult) -> ReportArtifact {
        let mut sheets = vec![self.summary_sheet(suite)];
        for session in &suite.sessions {
            sheets.push(self.detail_sheet(session));
        }
        for session in &suite.sessions {
            if let Some(sheet) = self.screenshot_sheet(session) {
                sheets.push(sheet);
            }
        }
        ReportArtifact {
            title: self.config.title.clone(),
            sheets,
        }
    }

    fn summary_sheet(&self, suite: &SuiteResult) -> Sheet {
        let mut blocks = Vec::new();

        if let Some(logo) = self.logo_block() {
            blocks.push(Block::Image(logo));
        }
        blocks.push(Block::Heading(Heading {
            text: self.config.title.clone(),
            fill: self.palette.header_bg,
            font: self.palette.header_font,
        }));
        if !self.config.company_name.is_empty() || !self.config.project_name.is_empty() {
            let line = [&self.config.company_name, &self.config.project_name]
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" / ");
            blocks.push(Block::Text { text: line });
        }
        if self.config.include_timestamp {
            // The suite's own end time keeps compilation deterministic
            blocks.push(Block::Text {
                text: suite
                    .finished_at
                    .format(&self.config.timestamp_format)
                    .to_string(),
            });
        }

        blocks.push(Block::Table(Table {
            header: vec!["Scenario".into(), "Browser".into(), "Mode".into()],
            header_fill: self.palette.header_bg,
            header_font: self.palette.header_font,
            rows: vec![TableRow {
                cells: vec![
                    suite.scenario_name.clone(),
                    suite.browser.clone(),
                    suite.mode.to_string(),
                ],
                fill: None,
            }],
        }));

        let rows = suite
            .sessions
            .iter()
            .map(|session| {
                let failed = session.log.failed_rows().len();
                let fill = if failed > 0 || !session.log.is_success() {
                    Some(self.palette.failure)
                } else {
                    Some(self.palette.success)
                };
                let duration = session.log.finished_at - session.log.started_at;
                TableRow {
                    cells: vec![
                        session.session_id.to_string(),
                        session.username.clone(),
                        if session.log.is_success() {
                            "OK".into()
                        } else {
                            "NG".into()
                        },
                        session.log.succeeded_rows().to_string(),
                        failed.to_string(),
                        format!("{:.1}", duration.num_milliseconds() as f64 / 1000.0),
                    ],
                    fill,
                }
            })
            .collect();
        blocks.push(Block::Table(Table {
            header: vec![
                "Session".into(),
                "User".into(),
                "Result".into(),
                "Success".into(),
                "Failed".into(),
                "Duration (s)".into(),
            ],
            header_fill: self.palette.header_bg,
            header_font: self.palette.header_font,
            rows,
        }));

        Sheet {
            name: "Summary".to_string(),
            zoom: None,
            blocks,
        }
    }

    fn detail_sheet(&self, session: &SessionResult) -> Sheet {
        let mut rows = Vec::new();
        let mut data_index = 0usize;
        for record in &session.log.records {
            let fill = if record.outcome == AttemptOutcome::Failed {
                Some(self.palette.failure)
            } else if data_index % 2 == 1 {
                Some(self.palette.alt_row)
            } else {
                None
            };
            rows.push(TableRow {
                cells: vec![
                    record.row_index.to_string(),
                    record.row_id.clone(),
                    record.action.clone(),
                    record.description.clone(),
                    record.attempt.to_string(),
                    record.outcome.to_string(),
                    record.started_at.format("%H:%M:%S").to_string(),
                ],
                fill,
            });
            data_index += 1;
            if let Some(error) = &record.error {
                rows.push(TableRow {
                    cells: vec![
                        String::new(),
                        String::new(),
                        String::new(),
                        error.clone(),
                        String::new(),
                        String::new(),
                        String::new(),
                    ],
                    fill: Some(self.palette.failure),
                });
                data_index += 1;
            }
        }

        Sheet {
            name: format!("Session {}", session.session_id),
            zoom: None,
            blocks: vec![Block::Table(Table {
                header: vec![
                    "No".into(),
                    "ID".into(),
                    "Action".into(),
                    "Description".into(),
                    "Attempt".into(),
                    "Result".into(),
                    "Time".into(),
                ],
                header_fill: self.palette.header_bg,
                header_font: self.palette.header_font,
                rows,
            })],
        }
    }

    /// Screenshot sheet for one session; `None` when no screenshot opted
    /// into report embedding
    fn screenshot_sheet(&self, session: &SessionResult) -> Option<Sheet> {
        let mut blocks = Vec::new();
        for record in &session.log.records {
            let shots: Vec<_> = record
                .screenshots
                .iter()
                .filter(|s| s.include_in_report)
                .collect();
            if shots.is_empty() {
                continue;
            }
            blocks.push(Block::Heading(Heading {
                text: row_title(record),
                fill: self.palette.screenshot_title,
                font: self.palette.screenshot_title.contrast_font(),
            }));
            for shot in shots {
                let is_error = shot.point == crate::capture::CapturePoint::OnError;
                blocks.push(Block::Image(ImageBlock {
                    path: shot.path.clone(),
                    label: shot.point.label().to_string(),
                    label_fill: is_error.then_some(self.palette.failure),
                    width: None,
                    height: None,
                }));
            }
        }

        if blocks.is_empty() {
            return None;
        }
        Some(Sheet {
            name: format!("Screenshots {}", session.session_id),
            zoom: Some(self.config.zoom_scale),
            blocks,
        })
    }

    /// Inspect the configured logo; missing or unreadable files degrade to no
    /// logo instead of failing the report
    fn logo_block(&self) -> Option<ImageBlock> {
        let path = self.config.logo_path.as_deref()?;
        match image::image_dimensions(path) {
            Ok((w, h)) if w > 0 => {
                let height = (h as f64 * LOGO_TARGET_WIDTH as f64 / w as f64).round() as u32;
                Some(ImageBlock {
                    path: path.to_path_buf(),
                    label: String::new(),
                    label_fill: None,
                    width: Some(LOGO_TARGET_WIDTH),
                    height: Some(height.max(1)),
                })
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "report logo unavailable");
                None
            }
        }
    }
}

fn row_title(record: &ExecutionRecord) -> String {
    if record.description.is_empty() {
        format!("Row {}: {}", record.row_index, record.action)
    } else {
        format!("Row {}: {}", record.row_index, record.description)
    }
}

fn validate_strftime(fmt: &str) -> ReportResult<()> {
    for item in StrftimeItems::new(fmt) {
        if matches!(item, Item::Error) {
            return Err(ReportError::InvalidTimestampFormat(fmt.to_string()));
        }
    }
    Ok(())
}

//! Output workspace layout for one run.
//!
//! Every invocation gets a fresh timestamped tree:
//!
//! ```text
//! output/<YYYYMMDD_HHMMSS>/
//!   result/       JSON results, JSONL live logs, the report artifact
//!   screenshot/   per-session screenshot directories
//! ```
//!
//! Runs never overwrite each other; the tree is kept after the run since the
//! artifacts are the deliverable.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Resolved directory layout for one run
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    /// Timestamped root, e.g. `output/20240501_120000`
    pub root: PathBuf,
    /// JSON results and the report artifact
    pub result_dir: PathBuf,
    /// Screenshot storage, one subdirectory per session
    pub screenshot_dir: PathBuf,
}

impl RunWorkspace {
    /// Create a fresh timestamped workspace under `base`
    pub fn create(base: &Path) -> io::Result<Self> {
        Self::at(base.join(timestamp_id()))
    }

    /// Create (or reuse) a workspace at an explicit root
    pub fn at(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let result_dir = root.join("result");
        let screenshot_dir = root.join("screenshot");
        fs::create_dir_all(&result_dir)?;
        fs::create_dir_all(&screenshot_dir)?;
        Ok(Self {
            root,
            result_dir,
            screenshot_dir,
        })
    }

    /// Screenshot directory for one session, created on demand
    pub fn session_screenshot_dir(&self, session_id: usize) -> io::Result<PathBuf> {
        let dir = self.screenshot_dir.join(format!("session_{}", session_id));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Path of a named JSON file under `result/`
    pub fn result_path(&self, name: &str) -> PathBuf {
        self.result_dir.join(format!("{}.json", sanitize_name(name)))
    }

    /// Path of a named JSONL file under `result/`
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.result_dir.join(format!("{}.jsonl", sanitize_name(name)))
    }

    /// Pretty-print a value as JSON under `result/`
    pub fn save_json<T: Serialize>(&self, name: &str, value: &T) -> io::Result<PathBuf> {
        let path = self.result_path(name);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// Timestamp id for the run root
fn timestamp_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

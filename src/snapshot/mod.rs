//! # Snapshot Store
//!
//! Owns the on-disk layout of baselines and run artifacts and compares fresh
//! output against the accepted baseline.
//!
//! ## Layout
//!
//! ```text
//! <snapshot_dir>/<suite>/<unit>.md              accepted baseline
//! <output_dir>/<suite>/<unit>.md                checked output of the last run
//! <output_dir>/<suite>/<unit>.log               info output of the last run
//! <output_dir>/<suite>/<unit>.value.json        return-value record
//! <output_dir>/<suite>/<unit>/_cache/<name>.*   computation cache entries
//! <output_dir>/cases.json                       aggregate record
//! ```
//!
//! Comparison is exact text after trimming leading and trailing whitespace.
//! Numeric jitter is absorbed earlier, when the unit writes its output (see
//! [`crate::context::RunContext::tnum`]), so the comparator itself stays exact.

pub mod diff;
pub mod tokens;

use crate::errors::{Result, SnapbookError};
use crate::value::Value;
use diff::{render_diff, DiffStyle};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Diff text reported when a unit has no baseline yet.
pub const NO_SNAPSHOT: &str = "no snapshot found";

const SNAPSHOT_EXT: &str = "md";

/// Outcome of comparing output against a baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub passed: bool,
    pub diff: Option<String>,
}

/// All file locations belonging to one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPaths {
    pub snapshot: PathBuf,
    pub output: PathBuf,
    pub info: PathBuf,
    pub value: PathBuf,
    pub cache_dir: PathBuf,
}

/// Reads and writes baselines and run artifacts beneath two root directories.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    snapshot_dir: PathBuf,
    output_dir: PathBuf,
    diff_style: DiffStyle,
    diff_width: usize,
}

impl SnapshotStore {
    pub fn new(snapshot_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            output_dir: output_dir.into(),
            diff_style: DiffStyle::default(),
            diff_width: 100,
        }
    }

    pub fn with_diff_style(mut self, style: DiffStyle) -> Self {
        self.diff_style = style;
        self
    }

    pub fn with_diff_width(mut self, width: usize) -> Self {
        self.diff_width = width;
        self
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Location of the aggregate record.
    pub fn case_log_path(&self) -> PathBuf {
        self.output_dir.join("cases.json")
    }

    /// File locations for the unit at `path` (`suite/unit`).
    pub fn paths(&self, path: &str) -> UnitPaths {
        let out = self.output_dir.join(path);
        UnitPaths {
            snapshot: self.snapshot_dir.join(format!("{}.{}", path, SNAPSHOT_EXT)),
            output: self.output_dir.join(format!("{}.{}", path, SNAPSHOT_EXT)),
            info: self.output_dir.join(format!("{}.log", path)),
            value: self.output_dir.join(format!("{}.value.json", path)),
            cache_dir: out.join("_cache"),
        }
    }

    // =====================
    // Baselines
    // =====================

    /// The accepted baseline, or `None` if the unit has never been accepted.
    pub fn read_snapshot(&self, path: &str) -> Result<Option<String>> {
        read_optional(&self.paths(path).snapshot)
    }

    /// Replaces the baseline wholesale.
    pub fn write_snapshot(&self, path: &str, text: &str) -> Result<()> {
        write_file(&self.paths(path).snapshot, text)
    }

    /// Promotes the last checked output of `path` to its baseline.
    ///
    /// Returns `false` when the unit has no recorded output to accept.
    pub fn accept(&self, path: &str) -> Result<bool> {
        let paths = self.paths(path);
        match read_optional(&paths.output)? {
            Some(text) => {
                write_file(&paths.snapshot, &text)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Compares `current` against the baseline of `path`.
    pub fn compare(&self, path: &str, current: &str) -> Result<Comparison> {
        let previous = self.read_snapshot(path)?;
        Ok(self.compare_with(previous.as_deref(), current))
    }

    /// Compares against an already loaded baseline.
    pub fn compare_with(&self, previous: Option<&str>, current: &str) -> Comparison {
        let Some(previous) = previous else {
            return Comparison {
                passed: false,
                diff: Some(NO_SNAPSHOT.to_string()),
            };
        };
        let expected = previous.trim();
        let actual = current.trim();
        if expected == actual {
            return Comparison {
                passed: true,
                diff: None,
            };
        }
        let rendered = render_diff(expected, actual, self.diff_style, self.diff_width);
        Comparison {
            passed: false,
            diff: Some(if rendered.is_empty() {
                "outputs differ in whitespace only".to_string()
            } else {
                rendered
            }),
        }
    }

    // =====================
    // Run artifacts
    // =====================

    /// Persists the checked and info output of a run.
    pub fn write_output(&self, path: &str, checked: &str, info: &str) -> Result<()> {
        let paths = self.paths(path);
        write_file(&paths.output, checked)?;
        write_file(&paths.info, info)
    }

    pub fn read_output(&self, path: &str) -> Result<Option<String>> {
        read_optional(&self.paths(path).output)
    }

    /// Persists the return value of a passing unit.
    pub fn write_value(&self, path: &str, value: &Value) -> Result<()> {
        write_file(&self.paths(path).value, &value.encode()?)
    }

    /// Reads a persisted return value, if any.
    pub fn read_value(&self, path: &str) -> Result<Option<Value>> {
        read_optional(&self.paths(path).value)?
            .map(|text| Value::decode(&text))
            .transpose()
    }

    /// Removes a stale return value so dependents cannot consume it.
    pub fn remove_value(&self, path: &str) -> Result<()> {
        let file = self.paths(path).value;
        match fs::remove_file(&file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapbookError::io(file, e)),
        }
    }

    // =====================
    // Listing
    // =====================

    /// Unit paths (`suite/unit`) of every baseline on disk, sorted.
    pub fn list_snapshots(&self) -> Vec<String> {
        let mut found: Vec<String> = WalkDir::new(&self.snapshot_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == SNAPSHOT_EXT)
                    .unwrap_or(false)
            })
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.snapshot_dir).ok()?;
                let rel = rel.with_extension("");
                Some(
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/"),
                )
            })
            .collect();
        found.sort();
        found
    }

    /// Baselines that no registered unit claims any more.
    pub fn orphaned_snapshots(&self, known: &HashSet<String>) -> Vec<String> {
        self.list_snapshots()
            .into_iter()
            .filter(|p| !known.contains(p))
            .collect()
    }
}

// ============================================================================
// FILE HELPERS
// ============================================================================

pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SnapbookError::io(path, e)),
    }
}

pub(crate) fn write_file(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SnapbookError::io(parent, e))?;
    }
    fs::write(path, text).map_err(|e| SnapbookError::io(path, e))
}

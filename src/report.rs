//! # Results and Reporting
//!
//! Per-unit results, the aggregate result of a run, the persisted case log
//! used for "re-run what failed", and the console reporter.
//!
//! The reporter is only ever driven from one thread (the output consumer in
//! parallel runs), so each unit gets exactly one status block and blocks from
//! different units never interleave.

use crate::errors::{Result, SnapbookError};
use crate::snapshot::{read_optional, write_file};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use termcolor::{Color, ColorChoice, ColorSpec, NoColor, StandardStream, WriteColor};

// =============================================================================
// CORE TYPES
// =============================================================================

/// Classification of a unit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Output matched the snapshot (or was accepted as the new one).
    Ok,
    /// Output differs from the snapshot; nothing else went wrong.
    Diff,
    /// The unit failed for a reason other than a plain text difference.
    Fail,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Ok => "OK",
            Outcome::Diff => "DIFF",
            Outcome::Fail => "FAIL",
        }
    }

    fn color(&self) -> Color {
        match self {
            Outcome::Ok => Color::Green,
            Outcome::Diff => Color::Yellow,
            Outcome::Fail => Color::Red,
        }
    }
}

/// Why a unit did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Text differs from the snapshot, or there is no snapshot yet.
    ComparisonMismatch,
    /// A directional metric crossed its previous value.
    RegressionViolation,
    /// The unit marked itself failed.
    Explicit,
    /// A dependency produced no value.
    MissingDependency,
    /// The unit needed a port and none was free.
    ResourceExhausted,
    /// The body returned an error or panicked.
    ExecutionFault,
}

/// The immutable result of one unit execution.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub path: String,
    pub outcome: Outcome,
    pub failures: Vec<FailureKind>,
    /// Human-readable failure detail (fault message, regressions, explicit fail).
    pub message: Option<String>,
    pub output: String,
    pub diff: Option<String>,
    pub value: Option<Value>,
    pub duration: Duration,
    /// The output replaced the snapshot during this run.
    pub accepted: bool,
}

impl UnitReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Ok
    }

    /// A failing report for a unit that never reached its body.
    pub fn aborted(path: &str, kind: FailureKind, message: String, duration: Duration) -> Self {
        Self {
            path: path.to_string(),
            outcome: Outcome::Fail,
            failures: vec![kind],
            message: Some(message),
            output: String::new(),
            diff: None,
            value: None,
            duration,
            accepted: false,
        }
    }
}

/// Aggregate result of a run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<UnitReport>,
    pub duration: Duration,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.count(Outcome::Ok)
    }

    pub fn diffs(&self) -> usize {
        self.count(Outcome::Diff)
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::Fail)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| !r.passed())
    }

    pub fn get(&self, path: &str) -> Option<&UnitReport> {
        self.results.iter().find(|r| r.path == path)
    }

    /// Process exit code: non-zero whenever any unit did not pass.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_failures())
    }
}

// =============================================================================
// CASE LOG
// =============================================================================

/// Last known status of one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub outcome: Outcome,
    pub duration_ms: u64,
}

/// Suite-level aggregate record of every unit's last status, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseLog {
    pub cases: BTreeMap<String, CaseRecord>,
}

impl CaseLog {
    /// Loads the log, or an empty one if none was written yet.
    pub fn load(path: &Path) -> Result<Self> {
        match read_optional(path)? {
            Some(text) => serde_json::from_str(&text)
                .map_err(|e| SnapbookError::serialization("read case log", e)),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| SnapbookError::serialization("write case log", e))?;
        write_file(path, &text)
    }

    /// Records the results of a run, keeping entries for units that did not run.
    pub fn merge(&mut self, report: &RunReport) {
        for r in &report.results {
            self.cases.insert(
                r.path.clone(),
                CaseRecord {
                    outcome: r.outcome,
                    duration_ms: r.duration.as_millis() as u64,
                },
            );
        }
    }

    /// Whether `path` should run under "only previously failed" selection.
    /// Units without a record count as failed.
    pub fn needs_rerun(&self, path: &str) -> bool {
        self.cases
            .get(path)
            .map(|c| c.outcome != Outcome::Ok)
            .unwrap_or(true)
    }
}

// =============================================================================
// REPORTER
// =============================================================================

/// Console output for a run. Owned by exactly one thread.
pub struct Reporter {
    out: Box<dyn WriteColor + Send>,
    show_diffs: bool,
}

impl Reporter {
    /// Reporter on stdout, coloured when `use_colors` is set.
    pub fn stdout(use_colors: bool) -> Self {
        let choice = if use_colors {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        Self::new(Box::new(StandardStream::stdout(choice)))
    }

    pub fn new(out: Box<dyn WriteColor + Send>) -> Self {
        Self {
            out,
            show_diffs: true,
        }
    }

    /// Reporter that discards everything, for embedding and tests.
    pub fn silent() -> Self {
        Self::new(Box::new(NoColor::new(std::io::sink())))
    }

    pub fn with_diffs(mut self, show: bool) -> Self {
        self.show_diffs = show;
        self
    }

    /// Prints the status block of one finished unit.
    pub fn unit_finished(&mut self, report: &UnitReport) {
        let _ = self.try_unit_finished(report);
    }

    fn try_unit_finished(&mut self, r: &UnitReport) -> std::io::Result<()> {
        write!(self.out, "  {} .. ", r.path)?;
        self.out
            .set_color(ColorSpec::new().set_fg(Some(r.outcome.color())).set_bold(true))?;
        write!(self.out, "{}", r.outcome.label())?;
        self.out.reset()?;
        if r.accepted {
            write!(self.out, " (accepted)")?;
        }
        writeln!(self.out, " {} ms", r.duration.as_millis())?;

        if let Some(message) = &r.message {
            writeln!(self.out, "    {}", message)?;
        }
        if self.show_diffs && !r.accepted {
            if let Some(diff) = &r.diff {
                self.print_diff(diff)?;
            }
        }
        Ok(())
    }

    fn print_diff(&mut self, diff: &str) -> std::io::Result<()> {
        for line in diff.lines() {
            let color = match line.chars().next() {
                Some('+') => Some(Color::Green),
                Some('-') => Some(Color::Red),
                _ => None,
            };
            match color {
                Some(c) => self.out.set_color(ColorSpec::new().set_fg(Some(c)))?,
                None => self.out.reset()?,
            }
            writeln!(self.out, "    {}", line)?;
        }
        self.out.reset()
    }

    /// Prints the final counts.
    pub fn summary(&mut self, report: &RunReport) {
        let _ = self.try_summary(report);
    }

    fn try_summary(&mut self, report: &RunReport) -> std::io::Result<()> {
        writeln!(self.out)?;
        write!(self.out, "{} units, ", report.total())?;
        self.colored(Color::Green, &format!("{} ok", report.passed()))?;
        write!(self.out, ", ")?;
        self.colored(Color::Yellow, &format!("{} diff", report.diffs()))?;
        write!(self.out, ", ")?;
        self.colored(Color::Red, &format!("{} failed", report.failed()))?;
        writeln!(self.out, " in {} ms", report.duration.as_millis())?;

        let failing: Vec<&UnitReport> = report.results.iter().filter(|r| !r.passed()).collect();
        if !failing.is_empty() {
            writeln!(self.out, "\nFailed units:")?;
            for r in failing {
                writeln!(self.out, "  - {} ({})", r.path, r.outcome.label())?;
            }
        }
        self.out.flush()
    }

    /// Prints a free-form line (listing, warnings).
    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
    }

    fn colored(&mut self, color: Color, text: &str) -> std::io::Result<()> {
        self.out.set_color(ColorSpec::new().set_fg(Some(color)))?;
        write!(self.out, "{}", text)?;
        self.out.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Shared buffer so tests can read what the reporter wrote.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn report(path: &str, outcome: Outcome) -> UnitReport {
        UnitReport {
            path: path.to_string(),
            outcome,
            failures: vec![],
            message: None,
            output: String::new(),
            diff: None,
            value: None,
            duration: Duration::from_millis(3),
            accepted: false,
        }
    }

    #[test]
    fn counts_and_exit_code() {
        let run = RunReport {
            results: vec![
                report("s/a", Outcome::Ok),
                report("s/b", Outcome::Diff),
                report("s/c", Outcome::Fail),
            ],
            duration: Duration::ZERO,
        };
        assert_eq!((run.passed(), run.diffs(), run.failed()), (1, 1, 1));
        assert_eq!(run.exit_code(), 1);
        let clean = RunReport {
            results: vec![report("s/a", Outcome::Ok)],
            duration: Duration::ZERO,
        };
        assert_eq!(clean.exit_code(), 0);
    }

    #[test]
    fn case_log_merges_and_selects_failures() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("cases.json");
        let mut log = CaseLog::load(&file).unwrap();
        log.merge(&RunReport {
            results: vec![report("s/a", Outcome::Ok), report("s/b", Outcome::Fail)],
            duration: Duration::ZERO,
        });
        log.save(&file).unwrap();

        let mut log = CaseLog::load(&file).unwrap();
        log.merge(&RunReport {
            results: vec![report("s/b", Outcome::Ok)],
            duration: Duration::ZERO,
        });
        assert_eq!(log.cases.len(), 2);
        assert!(!log.needs_rerun("s/a"));
        assert!(!log.needs_rerun("s/b"));
        assert!(log.needs_rerun("s/new"));
        assert_eq!(log.cases["s/a"].duration_ms, 3);
    }

    #[test]
    fn reporter_prints_status_and_diff() {
        let captured = Captured::default();
        let mut reporter = Reporter::new(Box::new(NoColor::new(captured.clone())));
        let mut r = report("s/b", Outcome::Diff);
        r.diff = Some("-old\n+new\n".into());
        reporter.unit_finished(&r);
        reporter.summary(&RunReport {
            results: vec![r],
            duration: Duration::ZERO,
        });
        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.starts_with("  s/b .. DIFF 3 ms\n    -old\n    +new\n"));
        assert!(text.contains("1 units, 0 ok, 1 diff, 0 failed"));
        assert!(text.contains("  - s/b (DIFF)"));
    }
}

//! # Run Context
//!
//! The mutable accumulator a unit writes to while it runs. It holds two
//! buffers: *checked* output, compared against the snapshot, and *info*
//! output, persisted for humans but never compared. Units can also flag
//! themselves failed, acquire ports, and reach their computation cache.
//!
//! ## Tolerance-aware writes
//!
//! [`RunContext::tnum`] and [`RunContext::tmetric`] look up the matching number
//! in the previous snapshot before deciding what to print. The n-th number
//! written to checked output lines up with the n-th standalone numeric token
//! of the previous snapshot. When the fresh value is within tolerance of the
//! old one, the old spelling is printed, so the snapshot stays stable under
//! jitter while real drift still shows up as a diff.

use crate::cache::ComputationCache;
use crate::errors::Result;
use crate::resources::{PortHandle, ResourcePool};
use crate::snapshot::tokens::{count_numeric_tokens, TokenCursor};
use std::fmt;
use std::sync::Arc;

/// Allowed distance between a fresh value and its previous snapshot value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Absolute delta.
    Absolute(f64),
    /// Percentage of the magnitude of the old value.
    Percent(f64),
}

impl Tolerance {
    /// The absolute delta this tolerance allows around `old`.
    pub fn delta(&self, old: f64) -> f64 {
        match *self {
            Tolerance::Absolute(d) => d.abs(),
            Tolerance::Percent(p) => old.abs() * p.abs() / 100.0,
        }
    }
}

impl From<f64> for Tolerance {
    fn from(delta: f64) -> Self {
        Tolerance::Absolute(delta)
    }
}

/// Direction in which a metric must not regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Higher is better: decreases beyond tolerance are regressions.
    Min,
    /// Lower is better: increases beyond tolerance are regressions.
    Max,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "min" => Ok(Direction::Min),
            "max" => Ok(Direction::Max),
            other => Err(format!("unknown direction '{}', expected 'min' or 'max'", other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Min => write!(f, "min"),
            Direction::Max => write!(f, "max"),
        }
    }
}

/// What a tolerance-aware write decided to print.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutcome {
    /// Within tolerance: the previous spelling is kept.
    Stable(String),
    /// Outside tolerance, or no previous value: the fresh value is printed.
    Changed(String),
    /// Crossed the forbidden direction: fresh value plus annotation, unit fails.
    Regression { text: String, previous: String },
}

impl MetricOutcome {
    /// Text appended to the checked output.
    pub fn render(&self) -> String {
        match self {
            MetricOutcome::Stable(text) | MetricOutcome::Changed(text) => text.clone(),
            MetricOutcome::Regression { text, previous } => {
                format!("{} [REGRESSION: was {}]", text, previous)
            }
        }
    }

    pub fn is_regression(&self) -> bool {
        matches!(self, MetricOutcome::Regression { .. })
    }
}

/// Decides what to print for `value` given the previous snapshot token.
///
/// `previous` is the old value together with its original spelling.
/// In recapture mode the fresh value is always printed.
pub fn resolve_metric(
    value: f64,
    previous: Option<(f64, &str)>,
    tolerance: Tolerance,
    direction: Option<Direction>,
    recapture: bool,
) -> MetricOutcome {
    let fresh = format_number(value);
    let Some((old, old_text)) = previous.filter(|_| !recapture) else {
        return MetricOutcome::Changed(fresh);
    };
    let delta = tolerance.delta(old);
    let regressed = match direction {
        Some(Direction::Min) => value < old - delta,
        Some(Direction::Max) => value > old + delta,
        None => false,
    };
    if regressed {
        MetricOutcome::Regression {
            text: fresh,
            previous: old_text.to_string(),
        }
    } else if (value - old).abs() <= delta {
        MetricOutcome::Stable(old_text.to_string())
    } else {
        MetricOutcome::Changed(fresh)
    }
}

/// Formats a number so it reads back as a numeric token (`50.0`, `1e21`).
pub fn format_number(value: f64) -> String {
    format!("{:?}", value)
}

/// Per-invocation state of a running unit.
pub struct RunContext {
    path: String,
    checked: String,
    info: String,
    failure: Option<String>,
    regressions: Vec<String>,
    cursor: TokenCursor,
    recapture: bool,
    resources: Arc<ResourcePool>,
    cache: ComputationCache,
    ports: Vec<PortHandle>,
}

impl RunContext {
    /// Creates the context for the unit at `path` (`suite/unit`).
    ///
    /// `previous` is the unit's accepted snapshot, used for tolerance-aware reads.
    pub fn new(
        path: impl Into<String>,
        previous: Option<&str>,
        recapture: bool,
        resources: Arc<ResourcePool>,
        cache: ComputationCache,
    ) -> Self {
        Self {
            path: path.into(),
            checked: String::new(),
            info: String::new(),
            failure: None,
            regressions: Vec::new(),
            cursor: TokenCursor::new(previous),
            recapture,
            resources,
            cache,
            ports: Vec::new(),
        }
    }

    /// `suite/unit` path of the running unit.
    pub fn path(&self) -> &str {
        &self.path
    }

    // =====================
    // Checked output
    // =====================

    /// Appends text to the checked output.
    pub fn t(&mut self, text: &str) -> &mut Self {
        self.checked.push_str(text);
        self
    }

    /// Appends a line to the checked output.
    pub fn tln(&mut self, text: &str) -> &mut Self {
        self.checked.push_str(text);
        self.checked.push('\n');
        self
    }

    pub fn h1(&mut self, title: &str) -> &mut Self {
        self.header(1, title)
    }

    pub fn h2(&mut self, title: &str) -> &mut Self {
        self.header(2, title)
    }

    fn header(&mut self, level: usize, title: &str) -> &mut Self {
        if !self.checked.is_empty() && !self.checked.ends_with("\n\n") {
            if !self.checked.ends_with('\n') {
                self.checked.push('\n');
            }
            self.checked.push('\n');
        }
        self.checked.push_str(&"#".repeat(level));
        self.checked.push(' ');
        self.checked.push_str(title);
        self.checked.push_str("\n\n");
        self
    }

    /// Writes `value` tolerance-aware, without a trailing newline.
    pub fn tnum(&mut self, value: f64, tolerance: impl Into<Tolerance>) -> &mut Self {
        let outcome = self.resolve(value, tolerance.into(), None);
        self.checked.push_str(&outcome.render());
        self
    }

    /// Writes a `name: value` line, tolerance-aware and optionally directional.
    ///
    /// Returns the decision so callers can inspect it; a regression also marks
    /// the unit failed.
    pub fn tmetric(
        &mut self,
        name: &str,
        value: f64,
        tolerance: impl Into<Tolerance>,
        direction: Option<Direction>,
    ) -> MetricOutcome {
        self.checked.push_str(name);
        self.checked.push_str(": ");
        let outcome = self.resolve(value, tolerance.into(), direction);
        self.checked.push_str(&outcome.render());
        self.checked.push('\n');
        if let MetricOutcome::Regression { text, previous } = &outcome {
            tracing::warn!(unit = %self.path, metric = name, value = %text, previous = %previous, "metric regression");
            self.regressions
                .push(format!("{} regressed ({}): {} -> {}", name, direction_label(direction), previous, text));
        }
        outcome
    }

    fn resolve(&mut self, value: f64, tolerance: Tolerance, direction: Option<Direction>) -> MetricOutcome {
        let index = count_numeric_tokens(&self.checked);
        let previous = self.cursor.at(index).map(|t| (t.value, t.text.as_str()));
        resolve_metric(value, previous, tolerance, direction, self.recapture)
    }

    // =====================
    // Info output
    // =====================

    /// Appends text to the info output (never compared).
    pub fn i(&mut self, text: &str) -> &mut Self {
        self.info.push_str(text);
        self
    }

    /// Appends a line to the info output (never compared).
    pub fn iln(&mut self, text: &str) -> &mut Self {
        self.info.push_str(text);
        self.info.push('\n');
        self
    }

    // =====================
    // Failure
    // =====================

    /// Marks the unit failed. Later messages are appended.
    pub fn fail(&mut self, message: &str) -> &mut Self {
        match &mut self.failure {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(message);
            }
            None => self.failure = Some(message.to_string()),
        }
        self
    }

    /// Prints `message` with an ok/FAILED marker and fails the unit if `condition` is false.
    pub fn assert_that(&mut self, condition: bool, message: &str) -> &mut Self {
        if condition {
            self.tln(&format!("{} ok", message));
        } else {
            self.tln(&format!("{} FAILED", message));
            self.fail(message);
        }
        self
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some() || !self.regressions.is_empty()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Regression annotations recorded by directional metrics.
    pub fn regressions(&self) -> &[String] {
        &self.regressions
    }

    // =====================
    // Resources
    // =====================

    /// Acquires a free port held until the unit finishes.
    pub fn port(&mut self) -> Result<u16> {
        let handle = self.resources.acquire_port()?;
        let port = handle.port();
        tracing::debug!(unit = %self.path, port, "acquired port");
        self.ports.push(handle);
        Ok(port)
    }

    /// Computation cache scoped to this unit.
    pub fn cache(&self) -> &ComputationCache {
        &self.cache
    }

    pub fn checked(&self) -> &str {
        &self.checked
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    /// Consumes the context, releasing held ports, and returns both buffers.
    pub fn into_output(self) -> ContextOutput {
        ContextOutput {
            checked: self.checked,
            info: self.info,
            failure: self.failure,
            regressions: self.regressions,
        }
    }
}

/// What remains of a context once its unit finished.
#[derive(Debug, Clone, Default)]
pub struct ContextOutput {
    pub checked: String,
    pub info: String,
    pub failure: Option<String>,
    pub regressions: Vec<String>,
}

fn direction_label(direction: Option<Direction>) -> String {
    direction.map(|d| d.to_string()).unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(dir: &TempDir, previous: Option<&str>, recapture: bool) -> RunContext {
        let pool = Arc::new(ResourcePool::new(41000, 41010).with_os_probe(false));
        let cache = ComputationCache::new(dir.path().join("cache"), false);
        RunContext::new("s/u", previous, recapture, pool, cache)
    }

    #[test]
    fn within_absolute_tolerance_keeps_old_value() {
        let out = resolve_metric(52.0, Some((50.0, "50.0")), Tolerance::Absolute(5.0), None, false);
        assert_eq!(out, MetricOutcome::Stable("50.0".into()));
        let out = resolve_metric(56.0, Some((50.0, "50.0")), Tolerance::Absolute(5.0), None, false);
        assert_eq!(out, MetricOutcome::Changed("56.0".into()));
    }

    #[test]
    fn percent_tolerance_scales_with_old_value() {
        let out = resolve_metric(-104.0, Some((-100.0, "-100")), Tolerance::Percent(5.0), None, false);
        assert_eq!(out, MetricOutcome::Stable("-100".into()));
        let out = resolve_metric(-106.0, Some((-100.0, "-100")), Tolerance::Percent(5.0), None, false);
        assert_eq!(out, MetricOutcome::Changed("-106.0".into()));
    }

    #[test]
    fn directional_constraints() {
        let prev = Some((50.0, "50.0"));
        let max = resolve_metric(80.0, prev, 5.0.into(), Some(Direction::Max), false);
        assert_eq!(max.render(), "80.0 [REGRESSION: was 50.0]");
        // improvements beyond tolerance are drift, not regressions
        let max = resolve_metric(20.0, prev, 5.0.into(), Some(Direction::Max), false);
        assert_eq!(max, MetricOutcome::Changed("20.0".into()));
        let min = resolve_metric(44.9, prev, 5.0.into(), Some(Direction::Min), false);
        assert!(min.is_regression());
        let min = resolve_metric(45.0, prev, 5.0.into(), Some(Direction::Min), false);
        assert_eq!(min, MetricOutcome::Stable("50.0".into()));
    }

    #[test]
    fn recapture_always_prints_fresh_value() {
        let out = resolve_metric(80.0, Some((50.0, "50.0")), 5.0.into(), Some(Direction::Max), true);
        assert_eq!(out, MetricOutcome::Changed("80.0".into()));
    }

    #[test]
    fn tmetric_reads_matching_snapshot_token() {
        let dir = TempDir::new().unwrap();
        let snapshot = "# bench\n\nrequests: 1000\nlatency: 50.0\np99_latency: 70.0\n";
        let mut t = context(&dir, Some(snapshot), false);
        t.h1("bench");
        t.tln("requests: 1000");
        let latency = t.tmetric("latency", 52.0, 5.0, Some(Direction::Max));
        let p99 = t.tmetric("p99_latency", 90.0, 5.0, Some(Direction::Max));
        assert_eq!(latency, MetricOutcome::Stable("50.0".into()));
        assert!(p99.is_regression());
        assert!(t.is_failed());
        assert_eq!(
            t.checked(),
            "# bench\n\nrequests: 1000\nlatency: 50.0\np99_latency: 90.0 [REGRESSION: was 70.0]\n"
        );
    }

    #[test]
    fn info_is_separate_and_fail_accumulates() {
        let dir = TempDir::new().unwrap();
        let mut t = context(&dir, None, false);
        t.tln("checked").iln("took 12 ms");
        t.assert_that(1 + 1 == 2, "arithmetic");
        assert!(!t.is_failed());
        t.fail("first").fail("second");
        let out = t.into_output();
        assert_eq!(out.checked, "checked\narithmetic ok\n");
        assert_eq!(out.info, "took 12 ms\n");
        assert_eq!(out.failure.as_deref(), Some("first; second"));
    }

    #[test]
    fn ports_are_released_with_the_context() {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(ResourcePool::new(41100, 41100).with_os_probe(false));
        let cache = ComputationCache::new(dir.path().join("cache"), false);
        let mut t = RunContext::new("s/u", None, false, pool.clone(), cache);
        assert_eq!(t.port().unwrap(), 41100);
        assert!(pool.acquire_port().is_err());
        drop(t.into_output());
        assert_eq!(pool.acquire_port().unwrap().port(), 41100);
    }
}

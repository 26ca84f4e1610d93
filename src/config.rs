//! Engine configuration.
//!
//! A plain struct with defaults, builder-style setters and an environment
//! overlay. The CLI layers its flags on top of [`EngineConfig::from_env`].

use crate::snapshot::diff::DiffStyle;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for one engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads; `1` selects the sequential executor.
    pub threads: usize,
    pub snapshot_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Ignore previous values in tolerance-aware writes.
    pub recapture: bool,
    /// Write mismatching output over the baseline.
    pub accept: bool,
    pub force_recompute: bool,
    pub diff_style: DiffStyle,
    pub port_base: u16,
    pub port_max: u16,
    /// Check that handed-out ports are bindable on localhost.
    pub probe_ports: bool,
    pub use_colors: bool,
    /// Run only units whose last recorded outcome was not OK.
    pub only_failed: bool,
    /// Substring a unit path must contain to be selected.
    pub filter: Option<String>,
    /// Scheduler back-off when nothing is ready.
    pub idle_sleep: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            snapshot_dir: PathBuf::from("snapbook/snapshots"),
            output_dir: PathBuf::from("target/snapbook"),
            recapture: false,
            accept: false,
            force_recompute: false,
            diff_style: DiffStyle::default(),
            port_base: 10000,
            port_max: 20000,
            probe_ports: true,
            use_colors: atty::is(atty::Stream::Stdout),
            only_failed: false,
            filter: None,
            idle_sleep: Duration::from_millis(5),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `SNAPBOOK_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`, ignoring unparsable values.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(threads) = lookup("SNAPBOOK_THREADS").and_then(|v| v.parse::<usize>().ok()) {
            self.threads = threads.max(1);
        }
        if let Some(dir) = lookup("SNAPBOOK_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SNAPBOOK_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup("SNAPBOOK_RECAPTURE") {
            self.recapture = truthy(&flag);
        }
        if let Some(flag) = lookup("SNAPBOOK_FORCE_RECOMPUTE") {
            self.force_recompute = truthy(&flag);
        }
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_recapture(mut self, recapture: bool) -> Self {
        self.recapture = recapture;
        self
    }

    pub fn with_accept(mut self, accept: bool) -> Self {
        self.accept = accept;
        self
    }

    pub fn with_force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }

    pub fn with_diff_style(mut self, style: DiffStyle) -> Self {
        self.diff_style = style;
        self
    }

    pub fn with_ports(mut self, base: u16, max: u16) -> Self {
        self.port_base = base;
        self.port_max = max;
        self
    }

    pub fn with_port_probe(mut self, probe: bool) -> Self {
        self.probe_ports = probe;
        self
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    pub fn with_only_failed(mut self, only_failed: bool) -> Self {
        self.only_failed = only_failed;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.is_empty());
        self
    }

    pub fn with_idle_sleep(mut self, idle: Duration) -> Self {
        self.idle_sleep = idle;
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.threads > 1
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

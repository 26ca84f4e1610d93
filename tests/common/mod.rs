//! # Shared Test Fixtures
//!
//! Every test runs against its own temporary snapshot and output tree.

#![allow(dead_code)]

use snapbook::{EngineConfig, Executor, Outcome, Reporter, RunReport, Suite};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.path().join("snapshots")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Sequential, uncoloured, no OS port probing.
    pub fn config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_snapshot_dir(self.snapshot_dir())
            .with_output_dir(self.output_dir())
            .with_port_probe(false)
            .with_colors(false)
            .with_idle_sleep(Duration::from_millis(1))
    }

    pub fn run(&self, suites: &[Suite], config: EngineConfig) -> RunReport {
        Executor::new(config)
            .run(suites, &mut Reporter::silent())
            .expect("run should not fail fatally")
    }

    /// Runs once in accept mode so later runs have baselines.
    pub fn accept_all(&self, suites: &[Suite]) -> RunReport {
        self.run(suites, self.config().with_accept(true))
    }

    pub fn snapshot(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.snapshot_dir().join(format!("{}.md", path))).ok()
    }

    pub fn write_snapshot(&self, path: &str, text: &str) {
        let file = self.snapshot_dir().join(format!("{}.md", path));
        fs::create_dir_all(file.parent().expect("parent")).expect("snapshot dir");
        fs::write(file, text).expect("write snapshot");
    }
}

/// `(path, outcome)` pairs sorted by path.
pub fn outcomes(report: &RunReport) -> Vec<(String, Outcome)> {
    let mut pairs: Vec<_> = report
        .results
        .iter()
        .map(|r| (r.path.clone(), r.outcome))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

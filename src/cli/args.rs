//! Command-line arguments of a snapbook test binary.
//!
//! Uses the `clap` derive API. Every flag maps onto one [`EngineConfig`] field;
//! anything not given on the command line keeps its environment or default
//! value.

use crate::config::EngineConfig;
use crate::snapshot::diff::DiffStyle;
use clap::Parser;
use std::path::PathBuf;
use std::thread;

/// Arguments accepted by [`crate::cli::run`].
#[derive(Debug, Parser)]
#[command(
    name = "snapbook",
    version,
    about = "Runs snapshot-tested units and compares their output with accepted baselines."
)]
pub struct SnapbookArgs {
    /// Only run units whose `suite/unit` path contains this text.
    pub filter: Option<String>,

    /// Run units in parallel, optionally with an explicit number of workers.
    #[arg(short, long, value_name = "THREADS", num_args = 0..=1, default_missing_value = "0")]
    pub parallel: Option<usize>,

    /// Accept mismatching output as the new snapshot.
    #[arg(short = 'u', long = "update")]
    pub update: bool,

    /// Print fresh values in tolerance-aware writes instead of keeping old ones.
    #[arg(short, long)]
    pub recapture: bool,

    /// Ignore stored computation cache entries.
    #[arg(short, long)]
    pub force_recompute: bool,

    /// Only run units that did not pass last time.
    #[arg(short = 'c', long = "continue")]
    pub only_failed: bool,

    /// How mismatches are presented.
    #[arg(long, value_enum)]
    pub diff_style: Option<DiffStyle>,

    /// Directory holding accepted snapshots.
    #[arg(long = "snapshots", value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// Directory for run output, value records and caches.
    #[arg(long = "out", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// List units and orphaned snapshots instead of running.
    #[arg(short, long)]
    pub list: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl SnapbookArgs {
    /// Layers the flags over `base`.
    pub fn apply(&self, base: EngineConfig) -> EngineConfig {
        let mut config = base
            .with_filter(self.filter.clone())
            .with_only_failed(self.only_failed);
        if let Some(threads) = self.parallel {
            config = config.with_threads(if threads == 0 { default_threads() } else { threads });
        }
        if self.update {
            config = config.with_accept(true);
        }
        if self.recapture {
            config = config.with_recapture(true);
        }
        if self.force_recompute {
            config = config.with_force_recompute(true);
        }
        if let Some(style) = self.diff_style {
            config = config.with_diff_style(style);
        }
        if let Some(dir) = &self.snapshot_dir {
            config = config.with_snapshot_dir(dir);
        }
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        config
    }
}

fn default_threads() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4).max(2)
}

//! The snapbook command-line front-end.
//!
//! A test binary registers its suites and hands them to [`run`], which parses
//! the command line, executes the selection and turns the result into a
//! process exit code: `0` when every unit passed, `1` otherwise.

use crate::cli::args::SnapbookArgs;
use crate::config::EngineConfig;
use crate::errors::SnapbookError;
use crate::executor::Executor;
use crate::logging;
use crate::report::{CaseLog, Reporter};
use crate::unit::Suite;
use clap::Parser;
use std::process::ExitCode;

pub mod args;

/// Main entry point for a test binary.
pub fn run(suites: Vec<Suite>) -> ExitCode {
    let args = SnapbookArgs::parse();
    logging::init(args.verbose);
    let config = args.apply(EngineConfig::from_env());
    let mut reporter = Reporter::stdout(config.use_colors);
    ExitCode::from(run_with_args(&args, config, &suites, &mut reporter))
}

/// Runs (or lists) `suites` with an already parsed command line.
///
/// Returns the process exit code.
pub fn run_with_args(args: &SnapbookArgs, config: EngineConfig, suites: &[Suite], reporter: &mut Reporter) -> u8 {
    let executor = Executor::new(config);
    let result = if args.list {
        list(&executor, suites, reporter).map(|_| 0)
    } else {
        executor
            .run(suites, reporter)
            .map(|report| u8::from(report.has_failures()))
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            print_error(e);
            1
        }
    }
}

/// Prints the selected units and any snapshot no unit claims.
fn list(executor: &Executor, suites: &[Suite], reporter: &mut Reporter) -> crate::Result<()> {
    let cases = CaseLog::load(&executor.store().case_log_path())?;
    let plan = executor.plan(suites, &cases)?;
    for path in plan.paths() {
        let marker = if executor.store().paths(&path).snapshot.exists() {
            " "
        } else {
            "*"
        };
        reporter.line(&format!("{} {}", marker, path));
    }
    let orphans = executor
        .store()
        .orphaned_snapshots(&Executor::known_paths(suites));
    if !orphans.is_empty() {
        reporter.line("\nOrphaned snapshots:");
        for path in orphans {
            reporter.line(&format!("  {}", path));
        }
    }
    Ok(())
}

/// Prints a fatal error with full miette diagnostics.
pub fn print_error(error: SnapbookError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}

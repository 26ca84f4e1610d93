//! Execution of a single unit.
//!
//! Both executor modes run units through [`execute_unit`], so a unit behaves
//! the same whichever mode or worker picks it up. Nothing in here prints:
//! the result is returned to the caller, who owns the console.

use super::values::DependencyValues;
use crate::cache::ComputationCache;
use crate::config::EngineConfig;
use crate::context::{ContextOutput, RunContext};
use crate::errors::{panic_message, Result, SnapbookError};
use crate::report::{FailureKind, Outcome, UnitReport};
use crate::resources::ResourcePool;
use crate::snapshot::SnapshotStore;
use crate::unit::{unit_path, Hook, Suite, Unit};
use crate::value::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// A selected unit together with the suite that owns its hooks.
#[derive(Debug, Clone, Copy)]
pub struct UnitJob<'a> {
    pub suite: &'a Suite,
    pub unit: &'a Unit,
}

impl UnitJob<'_> {
    pub fn path(&self) -> String {
        self.suite.path_of(self.unit.name())
    }

    /// Full paths of the declared dependencies, in declaration order.
    pub fn dependency_paths(&self) -> Vec<String> {
        self.unit
            .dependencies()
            .iter()
            .map(|d| unit_path(self.suite.name(), d))
            .collect()
    }
}

/// Everything a worker shares with the rest of the run.
pub struct ExecutionEnv<'a> {
    pub config: &'a EngineConfig,
    pub store: &'a SnapshotStore,
    pub pool: &'a Arc<ResourcePool>,
    pub values: &'a DependencyValues,
}

/// Runs one unit from lock acquisition to comparison and returns its result.
///
/// Declared locks are held for the whole call, failure paths included.
/// Teardown runs whenever setup ran. A panic anywhere in the unit's pipeline
/// still yields a failed result, so every started unit is reported.
pub fn execute_unit(env: &ExecutionEnv<'_>, job: &UnitJob<'_>) -> UnitReport {
    let path = job.path();
    contain_panics(&path, || run_unit(env, job)).unwrap_or_else(|aborted| {
        forget_value(env, &path);
        aborted
    })
}

/// Runs `run`, turning a panic into an aborted `ExecutionFault` result.
fn contain_panics(path: &str, run: impl FnOnce() -> UnitReport) -> std::result::Result<UnitReport, UnitReport> {
    let started = Instant::now();
    catch_unwind(AssertUnwindSafe(run)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(unit = path, error = %message, "unit pipeline panicked");
        UnitReport::aborted(path, FailureKind::ExecutionFault, message, started.elapsed())
    })
}

fn run_unit(env: &ExecutionEnv<'_>, job: &UnitJob<'_>) -> UnitReport {
    let path = job.path();
    let started = Instant::now();
    let _locks = env.pool.acquire_locks(job.unit.locks());
    tracing::debug!(unit = %path, locks = ?job.unit.locks(), "unit started");

    let deps = match env.values.resolve(&path, &job.dependency_paths()) {
        Ok(deps) => deps,
        Err(e) => {
            let kind = match &e {
                SnapbookError::MissingDependency { .. } => FailureKind::MissingDependency,
                _ => FailureKind::ExecutionFault,
            };
            tracing::warn!(unit = %path, error = %e, "unit not started");
            let report = UnitReport::aborted(&path, kind, e.to_string(), started.elapsed());
            forget_value(env, &path);
            return report;
        }
    };

    let previous = match env.store.read_snapshot(&path) {
        Ok(previous) => previous,
        Err(e) => {
            tracing::warn!(unit = %path, error = %e, "could not read snapshot");
            None
        }
    };

    let cache = ComputationCache::new(env.store.paths(&path).cache_dir, env.config.force_recompute);
    let mut ctx = RunContext::new(
        path.as_str(),
        previous.as_deref(),
        env.config.recapture,
        Arc::clone(env.pool),
        cache,
    );

    run_hook(job.suite.setup(), "setup", &mut ctx);
    let body = job.unit.body();
    let fault = match catch_unwind(AssertUnwindSafe(|| body.call(&mut ctx, deps))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            let kind = match e.downcast_ref::<SnapbookError>() {
                Some(SnapbookError::ResourceExhausted { .. }) => FailureKind::ResourceExhausted,
                _ => FailureKind::ExecutionFault,
            };
            Err((kind, e.to_string()))
        }
        Err(payload) => Err((FailureKind::ExecutionFault, panic_message(payload.as_ref()))),
    };
    run_hook(job.suite.teardown(), "teardown", &mut ctx);

    let output = ctx.into_output();
    match finish(env, &path, previous.as_deref(), output, fault) {
        Ok(mut report) => {
            report.duration = started.elapsed();
            tracing::info!(unit = %path, outcome = report.outcome.label(), "unit finished");
            report
        }
        Err(e) => {
            tracing::error!(unit = %path, error = %e, "could not record unit output");
            forget_value(env, &path);
            UnitReport::aborted(&path, FailureKind::ExecutionFault, e.to_string(), started.elapsed())
        }
    }
}

/// Persists output, compares it and classifies the result.
fn finish(
    env: &ExecutionEnv<'_>,
    path: &str,
    previous: Option<&str>,
    output: ContextOutput,
    result: std::result::Result<Value, (FailureKind, String)>,
) -> Result<UnitReport> {
    env.store.write_output(path, &output.checked, &output.info)?;
    let comparison = env.store.compare_with(previous, &output.checked);

    let mut failures = Vec::new();
    let mut messages = Vec::new();
    let value = match result {
        Ok(value) => Some(value),
        Err((kind, message)) => {
            let fault = SnapbookError::ExecutionFault {
                unit: path.to_string(),
                message,
            };
            tracing::warn!(error = %fault, "unit faulted");
            failures.push(kind);
            messages.push(fault.to_string());
            None
        }
    };
    if let Some(failure) = output.failure {
        failures.push(FailureKind::Explicit);
        messages.push(failure);
    }
    if !output.regressions.is_empty() {
        failures.push(FailureKind::RegressionViolation);
        messages.extend(output.regressions);
    }
    if !comparison.passed {
        failures.push(FailureKind::ComparisonMismatch);
    }

    let mut outcome = classify(&failures);
    let mut accepted = false;
    if outcome == Outcome::Diff && env.config.accept {
        env.store.write_snapshot(path, &output.checked)?;
        tracing::info!(unit = path, "snapshot accepted");
        outcome = Outcome::Ok;
        accepted = true;
        failures.clear();
    }

    if outcome == Outcome::Ok {
        env.values.record(path, value.clone().unwrap_or_default())?;
    } else {
        env.values.forget(path)?;
    }

    Ok(UnitReport {
        path: path.to_string(),
        outcome,
        failures,
        message: (!messages.is_empty()).then(|| messages.join("; ")),
        output: output.checked,
        diff: comparison.diff,
        value: if outcome == Outcome::Ok { value } else { None },
        duration: Default::default(),
        accepted,
    })
}

/// `Diff` when the text mismatch is the only problem, `Fail` for anything else.
pub fn classify(failures: &[FailureKind]) -> Outcome {
    if failures.is_empty() {
        Outcome::Ok
    } else if failures.iter().all(|f| *f == FailureKind::ComparisonMismatch) {
        Outcome::Diff
    } else {
        Outcome::Fail
    }
}

/// Runs a hook; faults are logged and noted in the info output only.
fn run_hook(hook: Option<&Hook>, stage: &str, ctx: &mut RunContext) {
    let Some(hook) = hook else {
        return;
    };
    let message = match catch_unwind(AssertUnwindSafe(|| hook(ctx))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };
    tracing::warn!(unit = %ctx.path(), stage, error = %message, "hook failed");
    ctx.iln(&format!("{} hook failed: {}", stage, message));
}

fn forget_value(env: &ExecutionEnv<'_>, path: &str) {
    if let Err(e) = env.values.forget(path) {
        tracing::warn!(unit = path, error = %e, "could not remove stale value record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(classify(&[]), Outcome::Ok);
        assert_eq!(classify(&[FailureKind::ComparisonMismatch]), Outcome::Diff);
        assert_eq!(
            classify(&[FailureKind::ComparisonMismatch, FailureKind::RegressionViolation]),
            Outcome::Fail
        );
        assert_eq!(classify(&[FailureKind::Explicit]), Outcome::Fail);
    }

    #[test]
    fn panics_after_the_body_become_failed_results() {
        let aborted = contain_panics("render/u", || panic!("diff renderer blew up")).unwrap_err();
        assert_eq!(aborted.path, "render/u");
        assert_eq!(aborted.outcome, Outcome::Fail);
        assert_eq!(aborted.failures, vec![FailureKind::ExecutionFault]);
        assert!(aborted.message.as_deref().unwrap().contains("diff renderer blew up"));

        let report = UnitReport::aborted("render/v", FailureKind::Explicit, "no".into(), Default::default());
        let passed = contain_panics("render/v", move || report).unwrap();
        assert_eq!(passed.failures, vec![FailureKind::Explicit]);
    }
}

//! Sequential driver: one unit at a time, in dependency order.

use super::worker::{execute_unit, ExecutionEnv};
use super::Plan;
use crate::errors::Result;
use crate::report::{Reporter, UnitReport};

pub(crate) fn run(env: &ExecutionEnv<'_>, plan: &Plan<'_>, reporter: &mut Reporter) -> Result<Vec<UnitReport>> {
    let order = plan.scheduler().linear_order()?;
    let mut results = Vec::with_capacity(order.len());
    for path in order {
        let Some(job) = plan.job(&path) else {
            continue;
        };
        let report = execute_unit(env, job);
        reporter.unit_finished(&report);
        results.push(report);
    }
    Ok(results)
}

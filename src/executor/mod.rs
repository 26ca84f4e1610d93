//! # Executor
//!
//! Turns registered suites into a [`RunReport`].
//!
//! ## Flow
//!
//! 1. **Plan**: select units (path filter, "only previously failed"), then
//!    build a [`DependencyScheduler`] over the selection. Cycles and unknown
//!    dependencies are rejected here, before anything runs.
//! 2. **Execute**: sequentially in linear order, or in parallel with a
//!    scheduler thread, a worker pool and the calling thread as the single
//!    output consumer. Both modes run each unit through [`execute_unit`].
//! 3. **Record**: release every pooled resource, merge results into the
//!    aggregate record and print the summary.
//!
//! The resource pool, the dependency values and the snapshot store are owned
//! by the executor instance; nothing is process-global.

mod parallel;
mod sequential;
pub mod values;
pub mod worker;

pub use values::DependencyValues;
pub use worker::{classify, execute_unit, ExecutionEnv, UnitJob};

use crate::config::EngineConfig;
use crate::errors::{Result, SnapbookError};
use crate::report::{CaseLog, Reporter, RunReport};
use crate::resources::ResourcePool;
use crate::scheduler::DependencyScheduler;
use crate::snapshot::SnapshotStore;
use crate::unit::Suite;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

/// The selected units of a run and the scheduler ordering them.
pub struct Plan<'a> {
    jobs: Vec<UnitJob<'a>>,
    index: HashMap<String, usize>,
    scheduler: DependencyScheduler,
}

impl<'a> Plan<'a> {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Selected unit paths in registration order.
    pub fn paths(&self) -> Vec<String> {
        self.jobs.iter().map(UnitJob::path).collect()
    }

    pub fn scheduler(&self) -> &DependencyScheduler {
        &self.scheduler
    }

    pub fn job(&self, path: &str) -> Option<&UnitJob<'a>> {
        self.index_of(path).and_then(|i| self.job_at(i))
    }

    pub(crate) fn job_at(&self, index: usize) -> Option<&UnitJob<'a>> {
        self.jobs.get(index)
    }

    pub(crate) fn index_of(&self, path: &str) -> Option<usize> {
        self.index.get(path).copied()
    }
}

/// Runs suites against one snapshot store and resource pool.
pub struct Executor {
    config: EngineConfig,
    store: SnapshotStore,
    pool: Arc<ResourcePool>,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        let store = SnapshotStore::new(&config.snapshot_dir, &config.output_dir)
            .with_diff_style(config.diff_style);
        let pool = Arc::new(
            ResourcePool::new(config.port_base, config.port_max).with_os_probe(config.probe_ports),
        );
        Self { config, store, pool }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// Every registered unit path across `suites`.
    pub fn known_paths(suites: &[Suite]) -> HashSet<String> {
        suites
            .iter()
            .flat_map(|s| s.units().iter().map(move |u| s.path_of(u.name())))
            .collect()
    }

    /// Selects units and validates their dependency graph.
    pub fn plan<'a>(&self, suites: &'a [Suite], cases: &CaseLog) -> Result<Plan<'a>> {
        let known = Self::known_paths(suites);
        let mut jobs = Vec::new();
        let mut index = HashMap::new();
        for suite in suites {
            for unit in suite.units() {
                let job = UnitJob { suite, unit };
                let path = job.path();
                if !self.selects(&path, cases) {
                    continue;
                }
                if index.insert(path, jobs.len()).is_some() {
                    return Err(SnapbookError::DuplicateUnit {
                        suite: suite.name().to_string(),
                        name: unit.name().to_string(),
                    });
                }
                jobs.push(job);
            }
        }
        let scheduler =
            DependencyScheduler::new(jobs.iter().map(|j| (j.path(), j.dependency_paths())), &known)?;
        Ok(Plan {
            jobs,
            index,
            scheduler,
        })
    }

    fn selects(&self, path: &str, cases: &CaseLog) -> bool {
        let filtered = self
            .config
            .filter
            .as_deref()
            .map(|f| path.contains(f))
            .unwrap_or(true);
        filtered && (!self.config.only_failed || cases.needs_rerun(path))
    }

    /// Executes the selected units of `suites` and records the results.
    pub fn run(&self, suites: &[Suite], reporter: &mut Reporter) -> Result<RunReport> {
        let started = Instant::now();
        let mut cases = CaseLog::load(&self.store.case_log_path())?;
        let plan = self.plan(suites, &cases)?;
        tracing::info!(
            units = plan.len(),
            threads = self.config.threads,
            accept = self.config.accept,
            recapture = self.config.recapture,
            "starting run"
        );

        let values = DependencyValues::new(self.store.clone());
        let env = ExecutionEnv {
            config: &self.config,
            store: &self.store,
            pool: &self.pool,
            values: &values,
        };
        let results = if self.config.is_parallel() {
            parallel::run(&env, &plan, self.config.threads, self.config.idle_sleep, reporter)
        } else {
            sequential::run(&env, &plan, reporter)
        };
        self.pool.release_all();

        let report = RunReport {
            results: results?,
            duration: started.elapsed(),
        };
        cases.merge(&report);
        cases.save(&self.store.case_log_path())?;
        reporter.summary(&report);
        tracing::info!(
            passed = report.passed(),
            diffs = report.diffs(),
            failed = report.failed(),
            "run finished"
        );
        Ok(report)
    }
}

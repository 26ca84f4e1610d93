//! # Snapbook
//!
//! A snapshot-testing execution engine. Units are registered explicitly in
//! suites, may depend on each other's return values, and produce text that is
//! compared against accepted snapshots. Units run sequentially or on a worker
//! pool; shared resources (ports, named locks) are arbitrated by a pool, and
//! expensive computations are memoized by argument hash.

pub use crate::config::EngineConfig;
pub use crate::context::{Direction, MetricOutcome, RunContext, Tolerance};
pub use crate::errors::{Result, SnapbookError, UnitError};
pub use crate::executor::Executor;
pub use crate::report::{Outcome, Reporter, RunReport, UnitReport};
pub use crate::unit::{clean_name, Suite, Unit};
pub use crate::value::Value;

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod report;
pub mod resources;
pub mod scheduler;
pub mod snapshot;
pub mod unit;
pub mod value;

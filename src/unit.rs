//! # Unit Registration
//!
//! Units are registered explicitly through a [`SuiteBuilder`]: each unit is a
//! name, an ordered list of dependency names, a set of lock names and a
//! closure body. Registration validates everything the executor later relies
//! on, so a built [`Suite`] is immutable and internally consistent:
//!
//! 1. unit names are cleaned and unique within the suite
//! 2. every dependency names a unit of the same suite
//! 3. the body accepts exactly as many values as there are dependencies (0 to 3)
//!
//! ```rust
//! use snapbook::{Suite, Unit, Value};
//!
//! let suite = Suite::builder("numbers")
//!     .unit(Unit::new("base", |t| {
//!         t.tln("base value is 1");
//!         Ok(Value::from(1))
//!     }))
//!     .unit(Unit::unary("double", "base", |t, base| {
//!         let doubled = base.as_i64().unwrap_or_default() * 2;
//!         t.tln(&format!("doubled: {}", doubled));
//!         Ok(Value::from(doubled))
//!     }))
//!     .build()
//!     .unwrap();
//! assert_eq!(suite.units().len(), 2);
//! ```

use crate::context::RunContext;
use crate::errors::{Result, SnapbookError, UnitError};
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// What a unit body returns.
pub type UnitResult = std::result::Result<Value, UnitError>;

type Body0 = dyn Fn(&mut RunContext) -> UnitResult + Send + Sync;
type Body1 = dyn Fn(&mut RunContext, Value) -> UnitResult + Send + Sync;
type Body2 = dyn Fn(&mut RunContext, Value, Value) -> UnitResult + Send + Sync;
type Body3 = dyn Fn(&mut RunContext, Value, Value, Value) -> UnitResult + Send + Sync;

/// A unit body, tagged by the number of dependency values it receives.
#[derive(Clone)]
pub enum UnitBody {
    Nullary(Arc<Body0>),
    Unary(Arc<Body1>),
    Binary(Arc<Body2>),
    Ternary(Arc<Body3>),
}

impl UnitBody {
    /// Number of dependency values the body accepts.
    pub fn arity(&self) -> usize {
        match self {
            UnitBody::Nullary(_) => 0,
            UnitBody::Unary(_) => 1,
            UnitBody::Binary(_) => 2,
            UnitBody::Ternary(_) => 3,
        }
    }

    /// Invokes the body, injecting `deps` positionally.
    ///
    /// `deps.len()` always equals [`UnitBody::arity`] for units that went through
    /// suite registration.
    pub fn call(&self, ctx: &mut RunContext, deps: Vec<Value>) -> UnitResult {
        let mut deps = deps.into_iter();
        let mut next = || deps.next().unwrap_or_default();
        match self {
            UnitBody::Nullary(f) => f(ctx),
            UnitBody::Unary(f) => {
                let a = next();
                f(ctx, a)
            }
            UnitBody::Binary(f) => {
                let a = next();
                let b = next();
                f(ctx, a, b)
            }
            UnitBody::Ternary(f) => {
                let a = next();
                let b = next();
                let c = next();
                f(ctx, a, b, c)
            }
        }
    }
}

impl fmt::Debug for UnitBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitBody(arity={})", self.arity())
    }
}

/// Setup or teardown callback invoked around every unit of a suite.
pub type Hook = Arc<dyn Fn(&mut RunContext) -> std::result::Result<(), UnitError> + Send + Sync>;

/// A single named test unit.
#[derive(Debug, Clone)]
pub struct Unit {
    name: String,
    dependencies: Vec<String>,
    locks: Vec<String>,
    body: UnitBody,
}

impl Unit {
    /// A unit without dependencies.
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut RunContext) -> UnitResult + Send + Sync + 'static,
    {
        Self::from_parts(name, Vec::new(), UnitBody::Nullary(Arc::new(body)))
    }

    /// A unit receiving the return value of one dependency.
    pub fn unary<F>(name: &str, dependency: &str, body: F) -> Self
    where
        F: Fn(&mut RunContext, Value) -> UnitResult + Send + Sync + 'static,
    {
        Self::from_parts(name, vec![dependency.to_string()], UnitBody::Unary(Arc::new(body)))
    }

    /// A unit receiving the return values of two dependencies, in declaration order.
    pub fn binary<F>(name: &str, dependencies: [&str; 2], body: F) -> Self
    where
        F: Fn(&mut RunContext, Value, Value) -> UnitResult + Send + Sync + 'static,
    {
        Self::from_parts(
            name,
            dependencies.iter().map(|d| d.to_string()).collect(),
            UnitBody::Binary(Arc::new(body)),
        )
    }

    /// A unit receiving the return values of three dependencies, in declaration order.
    pub fn ternary<F>(name: &str, dependencies: [&str; 3], body: F) -> Self
    where
        F: Fn(&mut RunContext, Value, Value, Value) -> UnitResult + Send + Sync + 'static,
    {
        Self::from_parts(
            name,
            dependencies.iter().map(|d| d.to_string()).collect(),
            UnitBody::Ternary(Arc::new(body)),
        )
    }

    /// Builds a unit from raw parts. Arity is checked when the unit is added to a suite.
    pub fn from_parts(name: &str, dependencies: Vec<String>, body: UnitBody) -> Self {
        Self {
            name: clean_name(name),
            dependencies: dependencies.iter().map(|d| clean_name(d)).collect(),
            locks: Vec::new(),
            body,
        }
    }

    /// Declares named locks held for the whole execution of this unit.
    pub fn with_locks<I, S>(mut self, locks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locks.extend(locks.into_iter().map(Into::into));
        self.locks.sort();
        self.locks.dedup();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Lock names, sorted and deduplicated so acquisition order is global.
    pub fn locks(&self) -> &[String] {
        &self.locks
    }

    pub fn body(&self) -> &UnitBody {
        &self.body
    }

    fn validate(&self) -> Result<()> {
        let declared = self.dependencies.len();
        if declared > 3 {
            return Err(SnapbookError::UnsupportedArity {
                unit: self.name.clone(),
                count: declared,
            });
        }
        if declared != self.body.arity() {
            return Err(SnapbookError::ArityMismatch {
                unit: self.name.clone(),
                declared,
                accepted: self.body.arity(),
            });
        }
        Ok(())
    }
}

/// An ordered, validated collection of units sharing hooks.
#[derive(Clone)]
pub struct Suite {
    name: String,
    units: Vec<Unit>,
    setup: Option<Hook>,
    teardown: Option<Hook>,
}

impl Suite {
    pub fn builder(name: &str) -> SuiteBuilder {
        SuiteBuilder {
            name: clean_name(name),
            units: Vec::new(),
            setup: None,
            teardown: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Units in registration order.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn setup(&self) -> Option<&Hook> {
        self.setup.as_ref()
    }

    pub fn teardown(&self) -> Option<&Hook> {
        self.teardown.as_ref()
    }

    /// `suite/unit` path identifying a unit across suites.
    pub fn path_of(&self, unit: &str) -> String {
        unit_path(&self.name, unit)
    }
}

impl fmt::Debug for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("units", &self.units)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// Builder returned by [`Suite::builder`].
pub struct SuiteBuilder {
    name: String,
    units: Vec<Unit>,
    setup: Option<Hook>,
    teardown: Option<Hook>,
}

impl SuiteBuilder {
    pub fn unit(mut self, unit: Unit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn setup<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext) -> std::result::Result<(), UnitError> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(hook));
        self
    }

    pub fn teardown<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut RunContext) -> std::result::Result<(), UnitError> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(hook));
        self
    }

    /// Validates names, arities and dependency edges.
    pub fn build(self) -> Result<Suite> {
        let mut seen = HashSet::new();
        for unit in &self.units {
            if !seen.insert(unit.name.as_str()) {
                return Err(SnapbookError::DuplicateUnit {
                    suite: self.name.clone(),
                    name: unit.name.clone(),
                });
            }
            unit.validate()?;
        }
        for unit in &self.units {
            if let Some(dep) = unit.dependencies.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(SnapbookError::UnknownDependency {
                    unit: unit_path(&self.name, &unit.name),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(Suite {
            name: self.name,
            units: self.units,
            setup: self.setup,
            teardown: self.teardown,
        })
    }
}

/// Joins a suite and unit name into the path used for scheduling and storage.
pub fn unit_path(suite: &str, unit: &str) -> String {
    format!("{}/{}", suite, unit)
}

/// Normalizes a raw identifier into a unit name.
///
/// Strips a `test_` prefix or `_test` suffix, lowercases, and collapses every
/// run of characters outside `[a-z0-9]` into a single `_`.
pub fn clean_name(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let stripped = lower
        .strip_prefix("test_")
        .or_else(|| lower.strip_suffix("_test"))
        .unwrap_or(&lower);

    let mut out = String::with_capacity(stripped.len());
    let mut pending_sep = false;
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out
}

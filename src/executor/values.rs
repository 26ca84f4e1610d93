//! Return values of completed units, shared by every worker of a run.
//!
//! Values live in memory for the duration of the run and are mirrored to the
//! unit's return-value record on disk. A lookup that misses memory falls back
//! to the record, which is how dependencies outside the current selection are
//! satisfied. The fallback read happens under the same lock that guards the
//! map, so concurrent misses on one dependency read the file once.

use crate::errors::{Result, SnapbookError};
use crate::snapshot::SnapshotStore;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub struct DependencyValues {
    memory: Mutex<HashMap<String, Value>>,
    store: SnapshotStore,
}

impl DependencyValues {
    pub fn new(store: SnapshotStore) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// The value recorded for `path`, from memory or from disk.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let mut memory = self.lock();
        if let Some(value) = memory.get(path) {
            return Ok(Some(value.clone()));
        }
        let loaded = self.store.read_value(path)?;
        if let Some(value) = &loaded {
            tracing::debug!(unit = path, "dependency value loaded from disk");
            memory.insert(path.to_string(), value.clone());
        }
        Ok(loaded)
    }

    /// Values of `dependencies` in declaration order.
    ///
    /// Fails with `MissingDependency` naming the first dependency without a value.
    pub fn resolve(&self, unit: &str, dependencies: &[String]) -> Result<Vec<Value>> {
        dependencies
            .iter()
            .map(|dep| {
                self.get(dep)?.ok_or_else(|| SnapbookError::MissingDependency {
                    unit: unit.to_string(),
                    dependency: dep.clone(),
                })
            })
            .collect()
    }

    /// Records the value of a passing unit.
    pub fn record(&self, path: &str, value: Value) -> Result<()> {
        self.store.write_value(path, &value)?;
        self.lock().insert(path.to_string(), value);
        Ok(())
    }

    /// Drops any value of a unit that did not pass, in memory and on disk.
    pub fn forget(&self, path: &str) -> Result<()> {
        self.lock().remove(path);
        self.store.remove_value(path)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

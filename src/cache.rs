//! # Computation Cache
//!
//! Content-addressed memoization of expensive computations. An entry is keyed
//! by a cache name and a SHA-256 hash of the canonically serialized arguments,
//! so the same arguments always hit the same entry across runs and process
//! restarts. Each name holds one entry on disk as a pair of files:
//!
//! ```text
//! <dir>/<name>.hash   hex digest of the arguments the payload was computed from
//! <dir>/<name>.json   encoded payload
//! ```
//!
//! Calling with different arguments recomputes and overwrites the entry.

use crate::errors::{Result, SnapbookError};
use crate::snapshot::{read_optional, write_file};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub hash: String,
    pub payload: Value,
}

/// Memoization store rooted at one directory.
#[derive(Debug, Clone)]
pub struct ComputationCache {
    dir: PathBuf,
    force_recompute: bool,
}

impl ComputationCache {
    pub fn new(dir: impl Into<PathBuf>, force_recompute: bool) -> Self {
        Self {
            dir: dir.into(),
            force_recompute,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the stored value for `(name, args)` or computes and stores it.
    pub fn get_or_compute<F>(&self, name: &str, args: &[Value], compute: F) -> Result<Value>
    where
        F: FnOnce() -> Value,
    {
        match self.get_or_try_compute(name, args, || Ok::<_, Infallible>(compute())) {
            Ok(value) => Ok(value),
            Err(CacheError::Store(e)) => Err(e),
            Err(CacheError::Compute(never)) => match never {},
        }
    }

    /// Like [`ComputationCache::get_or_compute`] for fallible computations.
    ///
    /// A failed computation stores nothing. A payload that no longer decodes
    /// counts as a miss and is overwritten.
    pub fn get_or_try_compute<F, E>(
        &self,
        name: &str,
        args: &[Value],
        compute: F,
    ) -> std::result::Result<Value, CacheError<E>>
    where
        F: FnOnce() -> std::result::Result<Value, E>,
    {
        let hash = hash_args(args).map_err(CacheError::Store)?;
        if !self.force_recompute {
            let cached = match self.entry(name) {
                Ok(entry) => entry,
                Err(e @ SnapbookError::Serialization { .. }) => {
                    tracing::warn!(cache = name, error = %e, "unreadable cache payload, recomputing");
                    None
                }
                Err(e) => return Err(CacheError::Store(e)),
            };
            if let Some(entry) = cached {
                if entry.hash == hash {
                    tracing::debug!(cache = name, %hash, "cache hit");
                    return Ok(entry.payload);
                }
            }
        }
        tracing::debug!(cache = name, %hash, force = self.force_recompute, "cache miss");
        let value = compute().map_err(CacheError::Compute)?;
        self.store(name, &hash, &value).map_err(CacheError::Store)?;
        Ok(value)
    }

    /// Reads the entry stored under `name`, if both of its files exist.
    pub fn entry(&self, name: &str) -> Result<Option<CacheEntry>> {
        let (hash_file, payload_file) = self.files(name);
        let Some(hash) = read_optional(&hash_file)? else {
            return Ok(None);
        };
        let Some(payload) = read_optional(&payload_file)? else {
            return Ok(None);
        };
        Ok(Some(CacheEntry {
            name: name.to_string(),
            hash: hash.trim().to_string(),
            payload: Value::decode(&payload)?,
        }))
    }

    /// Removes the entry stored under `name`.
    pub fn invalidate(&self, name: &str) -> Result<()> {
        let (hash_file, payload_file) = self.files(name);
        for file in [hash_file, payload_file] {
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(SnapbookError::io(file, e)),
            }
        }
        tracing::debug!(cache = name, "cache invalidated");
        Ok(())
    }

    fn store(&self, name: &str, hash: &str, value: &Value) -> Result<()> {
        let (hash_file, payload_file) = self.files(name);
        // payload first: a hash file without its payload reads as a miss
        write_file(&payload_file, &value.encode()?)?;
        write_file(&hash_file, hash)
    }

    fn files(&self, name: &str) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("{}.hash", name)),
            self.dir.join(format!("{}.json", name)),
        )
    }
}

/// Failure of [`ComputationCache::get_or_try_compute`].
#[derive(Debug)]
pub enum CacheError<E> {
    /// The cache itself could not be read or written.
    Store(SnapbookError),
    /// The computation failed.
    Compute(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CacheError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Store(e) => write!(f, "{}", e),
            CacheError::Compute(e) => write!(f, "computation failed: {}", e),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CacheError<E> {}

/// Lowercase hex SHA-256 over the canonical encoding of `args`.
pub fn hash_args(args: &[Value]) -> Result<String> {
    let mut hasher = Sha256::new();
    for arg in args {
        hasher.update(arg.encode()?.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[test]
    fn hash_is_deterministic_and_argument_sensitive() {
        let a = hash_args(&[Value::from(1), Value::from("x")]).unwrap();
        let b = hash_args(&[Value::from(1), Value::from("x")]).unwrap();
        let c = hash_args(&[Value::from(2), Value::from("x")]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        // Int and Float of the same magnitude encode differently
        assert_ne!(hash_args(&[Value::from(1)]).unwrap(), hash_args(&[Value::from(1.0)]).unwrap());
    }

    #[test]
    fn computes_once_per_argument_set() {
        let dir = TempDir::new().unwrap();
        let cache = ComputationCache::new(dir.path(), false);
        let calls = Cell::new(0);
        let square = |n: i64| {
            cache
                .get_or_compute("square", &[Value::from(n)], || {
                    calls.set(calls.get() + 1);
                    Value::from(n * n)
                })
                .unwrap()
        };
        assert_eq!(square(4), Value::from(16));
        assert_eq!(square(4), Value::from(16));
        assert_eq!(calls.get(), 1);
        assert_eq!(square(5), Value::from(25));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn survives_a_new_cache_instance() {
        let dir = TempDir::new().unwrap();
        ComputationCache::new(dir.path(), false)
            .get_or_compute("model", &[Value::from("v1")], || Value::from("trained"))
            .unwrap();
        let again = ComputationCache::new(dir.path(), false)
            .get_or_compute("model", &[Value::from("v1")], || panic!("must hit the cache"))
            .unwrap();
        assert_eq!(again, Value::from("trained"));
    }

    #[test]
    fn force_recompute_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let cache = ComputationCache::new(dir.path(), false);
        cache.get_or_compute("n", &[], || Value::from(1)).unwrap();
        assert!(cache.entry("n").unwrap().is_some());

        let forced = ComputationCache::new(dir.path(), true);
        assert_eq!(forced.get_or_compute("n", &[], || Value::from(2)).unwrap(), Value::from(2));

        cache.invalidate("n").unwrap();
        assert!(cache.entry("n").unwrap().is_none());
        assert_eq!(cache.get_or_compute("n", &[], || Value::from(3)).unwrap(), Value::from(3));
    }

    #[test]
    fn non_finite_results_are_cached() {
        let dir = TempDir::new().unwrap();
        let cache = ComputationCache::new(dir.path(), false);
        let first = cache.get_or_compute("n", &[], || Value::Float(f64::NAN)).unwrap();
        assert!(first.as_f64().unwrap().is_nan());
        let again = cache
            .get_or_compute("n", &[], || panic!("must hit the cache"))
            .unwrap();
        assert!(again.as_f64().unwrap().is_nan());
    }

    #[test]
    fn undecodable_payload_is_recomputed() {
        let dir = TempDir::new().unwrap();
        let cache = ComputationCache::new(dir.path(), false);
        cache.get_or_compute("n", &[], || Value::from(1)).unwrap();
        fs::write(dir.path().join("n.json"), r#"{"kind":"float","value":null}"#).unwrap();

        assert_eq!(cache.get_or_compute("n", &[], || Value::from(2)).unwrap(), Value::from(2));
        assert_eq!(cache.entry("n").unwrap().unwrap().payload, Value::from(2));
    }

    #[test]
    fn failed_computation_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = ComputationCache::new(dir.path(), false);
        let result = cache.get_or_try_compute("flaky", &[], || Err::<Value, _>("offline"));
        assert!(matches!(result, Err(CacheError::Compute("offline"))));
        assert!(cache.entry("flaky").unwrap().is_none());
    }
}

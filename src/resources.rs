//! # Resource Pool
//!
//! Arbitrates resources that parallel units must not share:
//!
//! - **Ports**: a fungible pool scanned upward from `base` to `max` for the first
//!   port no unit holds (and, unless disabled, that the OS lets us bind).
//! - **Named locks**: binary locks created lazily on first use. A unit holds
//!   all of its declared locks for its whole execution, so two units with an
//!   overlapping lock set run one after the other.
//!
//! Every acquisition yields an RAII handle carrying a unique token. Dropping
//! the handle releases the resource only if the token still owns it, so a
//! handle outliving a forced [`ResourcePool::release_all`] cannot free a
//! resource someone else acquired since.

use crate::errors::{Result, SnapbookError};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// A binary lock, created on first use of its name.
#[derive(Debug, Default)]
struct NamedLock {
    holder: Mutex<Option<u64>>,
    released: Condvar,
}

/// Shared pool of ports and named locks.
#[derive(Debug)]
pub struct ResourcePool {
    port_base: u16,
    port_max: u16,
    probe_os: bool,
    ports: Mutex<HashMap<u16, u64>>,
    locks: Mutex<HashMap<String, Arc<NamedLock>>>,
    next_token: AtomicU64,
}

impl ResourcePool {
    /// A pool handing out ports in `base..=max`.
    pub fn new(port_base: u16, port_max: u16) -> Self {
        Self {
            port_base,
            port_max,
            probe_os: true,
            ports: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Whether ports are also checked for bindability on localhost.
    pub fn with_os_probe(mut self, probe: bool) -> Self {
        self.probe_os = probe;
        self
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    // =====================
    // Ports
    // =====================

    /// Allocates the lowest free port.
    pub fn acquire_port(self: &Arc<Self>) -> Result<PortHandle> {
        let mut ports = lock(&self.ports);
        for port in self.port_base..=self.port_max {
            if ports.contains_key(&port) {
                continue;
            }
            if self.probe_os && TcpListener::bind(("127.0.0.1", port)).is_err() {
                continue;
            }
            let token = self.token();
            ports.insert(port, token);
            return Ok(PortHandle {
                pool: Arc::clone(self),
                port,
                token,
            });
        }
        Err(SnapbookError::ResourceExhausted {
            resource: "port".to_string(),
            base: self.port_base,
            max: self.port_max,
        })
    }

    /// Frees `port` regardless of which handle holds it.
    pub fn release_port(&self, port: u16) {
        lock(&self.ports).remove(&port);
    }

    fn release_port_token(&self, port: u16, token: u64) {
        let mut ports = lock(&self.ports);
        if ports.get(&port) == Some(&token) {
            ports.remove(&port);
        }
    }

    pub fn ports_in_use(&self) -> usize {
        lock(&self.ports).len()
    }

    // =====================
    // Named locks
    // =====================

    fn named(&self, name: &str) -> Arc<NamedLock> {
        Arc::clone(lock(&self.locks).entry(name.to_string()).or_default())
    }

    /// Blocks until the lock `name` is free, then takes it.
    pub fn acquire_lock(&self, name: &str) -> LockGuard {
        let named = self.named(name);
        let token = self.token();
        let mut holder = lock(&named.holder);
        if holder.is_some() {
            tracing::debug!(lock = name, "waiting for lock");
        }
        while holder.is_some() {
            holder = named
                .released
                .wait(holder)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *holder = Some(token);
        drop(holder);
        LockGuard {
            lock: named,
            name: name.to_string(),
            token,
        }
    }

    /// Takes the lock `name` if it is free.
    pub fn try_acquire_lock(&self, name: &str) -> Option<LockGuard> {
        let named = self.named(name);
        let token = self.token();
        let mut holder = lock(&named.holder);
        if holder.is_some() {
            return None;
        }
        *holder = Some(token);
        drop(holder);
        Some(LockGuard {
            lock: named,
            name: name.to_string(),
            token,
        })
    }

    /// Acquires several locks in sorted order, so overlapping sets cannot deadlock.
    pub fn acquire_locks(&self, names: &[String]) -> Vec<LockGuard> {
        let mut sorted: Vec<&String> = names.iter().collect();
        sorted.sort();
        sorted.dedup();
        sorted.into_iter().map(|n| self.acquire_lock(n)).collect()
    }

    /// Frees the lock `name` regardless of which handle holds it.
    pub fn release_lock(&self, name: &str) {
        let named = self.named(name);
        *lock(&named.holder) = None;
        named.released.notify_all();
    }

    pub fn is_locked(&self, name: &str) -> bool {
        lock(&self.named(name).holder).is_some()
    }

    /// Forcibly frees every port and lock.
    pub fn release_all(&self) {
        let released_ports = {
            let mut ports = lock(&self.ports);
            let n = ports.len();
            ports.clear();
            n
        };
        let locks: Vec<Arc<NamedLock>> = lock(&self.locks).values().cloned().collect();
        let mut released_locks = 0;
        for named in locks {
            let mut holder = lock(&named.holder);
            if holder.take().is_some() {
                released_locks += 1;
            }
            drop(holder);
            named.released.notify_all();
        }
        if released_ports + released_locks > 0 {
            tracing::warn!(ports = released_ports, locks = released_locks, "forcibly released resources");
        }
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(10000, 20000)
    }
}

/// Exclusive ownership of a port; released on drop.
#[derive(Debug)]
pub struct PortHandle {
    pool: Arc<ResourcePool>,
    port: u16,
    token: u64,
}

impl PortHandle {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortHandle {
    fn drop(&mut self) {
        self.pool.release_port_token(self.port, self.token);
    }
}

/// Exclusive ownership of a named lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<NamedLock>,
    name: String,
    token: u64,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut holder = lock(&self.lock.holder);
        if *holder == Some(self.token) {
            *holder = None;
            drop(holder);
            self.lock.released.notify_all();
        }
    }
}

/// Poison-tolerant lock: a panicking unit must not wedge the pool.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Per-identifier mutual exclusion within one process.
//!
//! Entries are never removed; the registry grows with the number of distinct
//! identifiers touched during a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Registry of async mutexes keyed by composite identifier.
#[derive(Clone, Debug, Default)]
pub struct LockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Held lock on one identifier; released when dropped, including on unwind.
#[derive(Debug)]
pub struct IdLock {
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl IdLock {
    /// Identifier the lock is held for.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl LockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other holder has `id`, then takes the lock.
    pub async fn lock(&self, id: &str) -> IdLock {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id.to_owned()).or_default())
        };
        debug!(id, "waiting for identifier lock");
        let guard = mutex.lock_owned().await;
        IdLock {
            id: id.to_owned(),
            _guard: guard,
        }
    }

    /// Number of identifiers the registry has seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` when no identifier was ever locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Per-instance mutual exclusion for lifecycle-mutating operations.
//!
//! At most one mutating operation may run against an instance at a time; a
//! second request fails immediately instead of queuing, because a queued
//! push applied to a half-installed instance would corrupt it. The arbiter
//! is a seam: deployments running orchestration workers in several processes
//! substitute a shared service for the in-process default.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Raised when a mutating operation is already in flight for an instance.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("another operation is already running for instance {instance_id}")]
pub struct ConcurrentOperationError {
    /// Instance the rejected operation targeted.
    pub instance_id: String,
}

/// Arbitrates exclusive access to an instance for the duration of one
/// lifecycle operation.
pub trait OperationArbiter: Send + Sync {
    /// RAII guard releasing the claim when dropped.
    type Guard: Send;

    /// Claims `instance_id`, failing fast when it is already claimed.
    ///
    /// # Errors
    ///
    /// Returns [`ConcurrentOperationError`] when another operation holds the
    /// claim; the request is never queued.
    fn try_acquire(&self, instance_id: &str) -> Result<Self::Guard, ConcurrentOperationError>;
}

/// In-process arbiter backed by a mutex-guarded id set.
#[derive(Clone, Debug, Default)]
pub struct KeyedLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl KeyedLock {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Guard created by [`KeyedLock::try_acquire`]; dropping it releases the
/// instance.
#[derive(Debug)]
pub struct KeyedLockGuard {
    held: Arc<Mutex<HashSet<String>>>,
    instance_id: String,
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        // A panic elsewhere must not leak the claim; recover the table.
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.instance_id);
    }
}

impl OperationArbiter for KeyedLock {
    type Guard = KeyedLockGuard;

    fn try_acquire(&self, instance_id: &str) -> Result<Self::Guard, ConcurrentOperationError> {
        let mut held = self
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !held.insert(instance_id.to_owned()) {
            return Err(ConcurrentOperationError {
                instance_id: instance_id.to_owned(),
            });
        }
        Ok(KeyedLockGuard {
            held: Arc::clone(&self.held),
            instance_id: instance_id.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_on_same_instance_fails() {
        let lock = KeyedLock::new();
        let _guard = lock.try_acquire("inst-1").expect("first claim");

        let err = lock.try_acquire("inst-1").expect_err("second claim");
        assert_eq!(err.instance_id, "inst-1");
    }

    #[test]
    fn distinct_instances_do_not_contend() {
        let lock = KeyedLock::new();
        let _a = lock.try_acquire("inst-1").expect("first instance");
        let _b = lock.try_acquire("inst-2").expect("second instance");
    }

    #[test]
    fn dropping_the_guard_releases_the_instance() {
        let lock = KeyedLock::new();
        drop(lock.try_acquire("inst-1").expect("first claim"));
        let _again = lock.try_acquire("inst-1").expect("reclaim after release");
    }

    #[test]
    fn poisoned_table_still_arbitrates() {
        let lock = KeyedLock::new();
        let held = Arc::clone(&lock.held);
        std::thread::spawn(move || {
            let _table = held.lock().expect("table");
            panic!("poison the table");
        })
        .join()
        .expect_err("spawned thread panics");

        let _guard = lock.try_acquire("inst-1").expect("claim despite poison");
        let err = lock.try_acquire("inst-1").expect_err("claim is still exclusive");
        assert_eq!(err.instance_id, "inst-1");
    }
}
